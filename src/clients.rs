pub(crate) mod anthropic;
pub(crate) mod tmdb;
pub mod vimeo;

pub(crate) use anthropic::AnthropicClient;
pub(crate) use tmdb::TmdbClient;
pub(crate) use vimeo::VimeoClient;

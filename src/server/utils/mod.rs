pub mod form_utils;
pub mod header_utils;
pub mod rewrite_utils;
pub mod url_utils;
pub mod youtube_utils;

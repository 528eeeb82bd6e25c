mod target_url_extractor;

pub use target_url_extractor::*;

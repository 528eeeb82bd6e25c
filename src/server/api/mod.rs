pub mod health_controller;
pub mod proxy_controller;
pub mod search_controller;
pub mod youtube_controller;

pub mod error_dto;
pub mod status_dto;

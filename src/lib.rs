pub mod article;
pub mod auth;
pub mod captcha;
pub mod comment;
pub mod config;
pub mod feed;
pub mod markdown;
pub mod metadata;
pub mod page;
pub mod serve;
pub mod stamp;
pub mod tag;
pub mod workspace;

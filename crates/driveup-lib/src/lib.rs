// driveup-lib: library behind the driveup uploader

pub mod accounts;
pub mod auth;
pub mod cli;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod http_client;
pub mod logger;
pub mod output;
pub mod signal;
pub mod space;
pub mod upload;
pub mod utils;

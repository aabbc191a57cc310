pub mod app;
pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod ftp;
pub mod http;
pub mod manifest;
pub mod output;
pub mod remote;
pub mod skiplist;
pub mod store;
pub mod summary;
pub mod target;
pub mod transfer;

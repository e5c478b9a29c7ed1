#[path = "../helpers/mod.rs"]
mod helpers;

mod concurrency;
mod lifecycle;
mod nodes;
mod readdir;

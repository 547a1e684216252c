use thiserror::Error;

pub mod common;
pub mod compositor;
pub mod headless;
pub mod input;
pub mod overlay;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Shutdown")]
    Shutdown,
    #[error("Fatal: {0:?}")]
    Fatal(#[from] anyhow::Error),
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

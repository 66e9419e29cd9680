use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostbookError {
    #[error("no page template available")]
    MissingPageTemplate,
    #[error("unknown page template '{0}'")]
    UnknownPageTemplate(String),
    #[error("flowable cannot fit on any page: {0}")]
    UnplaceableFlowable(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unsupported file extension '{0}'; use .json, .yaml, .yml or .csv")]
    UnsupportedFormat(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T, E = PostbookError> = std::result::Result<T, E>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OddsApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by odds provider")]
    RateLimited,

    #[error("unexpected status {0} from odds provider")]
    Status(u16),

    #[error("invalid response from odds provider: {0}")]
    InvalidResponse(String),
}

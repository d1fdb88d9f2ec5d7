use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("failed to create conversation store directory at {path}"))]
    CreateStoreDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read conversation store from {path}"))]
    ReadStore {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to decode conversation store at {path}: {source}"))]
    DecodeStore {
        stage: &'static str,
        path: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to encode conversations on `{stage}`: {source}"))]
    EncodeStore {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write conversation store to {path}"))]
    WriteStore {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace conversation store {to} with {from}"))]
    ReplaceStore {
        stage: &'static str,
        from: String,
        to: String,
        source: std::io::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

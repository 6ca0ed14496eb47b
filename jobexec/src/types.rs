use uuid::Uuid;

pub type JobId = Uuid;
pub type Owner = String;
pub type Argv = Vec<String>;
pub type OutputBlob = bytes::Bytes;

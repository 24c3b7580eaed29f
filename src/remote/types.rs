//! Wire DTOs for the remote platform's JSON API. These are deserialized
//! straight off HTTP responses, the way the teacher's `RemoteEntry` in
//! `api_client.rs` does, and converted into the core's own
//! `RemoteDataObjectDesc`/`FolderListing` types at the adapter boundary so
//! the rest of the crate never depends on the wire format.

use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct WireDataObject {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
    #[serde(default)]
    pub symlink_path: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct WireFolderListing {
    pub data_objects: Vec<WireDataObject>,
    pub subdirs: Vec<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct WireProjectDesc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Deserialize, Debug)]
pub struct WireFileNewResponse {
    pub id: String,
}

#[derive(Deserialize, Debug)]
pub struct WireUploadUrlResponse {
    pub url: String,
}

#[derive(Deserialize, Debug)]
pub struct WireDownloadUrlResponse {
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
pub struct WireFileDescribe {
    pub state: String,
}

#[derive(Deserialize, Debug)]
pub struct WireFindProjectResponse {
    pub id: String,
}

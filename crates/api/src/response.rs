use serde::Serialize;

/// Body of every successful JSON response: `{ "data": ... }`.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Error answer of the app, with the stable string code of the kind
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorMessage {
    pub code: u16,
    pub error: String,
    pub message: String,
}

/// Plain confirmation answer
#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok<S: Into<String>>(message: S) -> Self {
        MessageResponse {
            success: true,
            message: message.into(),
        }
    }
}

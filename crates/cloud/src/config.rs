/// Cloud endpoint and launch-template configuration, sourced from the
/// `[ec2]` and `[debug]` sections of the config file.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_url: String,
    pub api_version: Option<String>,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,

    pub image_id: String,
    pub key_name: String,
    pub flavour: String,
    pub user_data: Vec<u8>,
}

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub charges_taxes: bool,
    #[validate(length(max = 64))]
    pub tps_number: Option<String>,
    #[validate(length(max = 64))]
    pub tvq_number: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub gateway_customer_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    pub client_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

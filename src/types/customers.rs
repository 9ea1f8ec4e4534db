use serde::Deserialize;
use utoipa::ToSchema;

use crate::models::customer::CustomerDetails;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    #[serde(alias = "phone_number")]
    pub phone_number: Option<String>,
    pub alias: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
}

impl From<CustomerRequest> for CustomerDetails {
    fn from(req: CustomerRequest) -> Self {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        CustomerDetails {
            phone_number: clean(req.phone_number),
            alias: clean(req.alias),
            name: clean(req.name),
            company: clean(req.company),
            email: clean(req.email),
        }
    }
}

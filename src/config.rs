// config.rs
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub psp_client_id: String,
    pub psp_client_secret: String,
    pub psp_merchant_id: String,
    pub psp_environment: String,
    pub database_url: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let psp_environment = env::var("PSP_ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".to_string());

        AppConfig {
            psp_client_id: env::var("PSP_CLIENT_ID")
                .expect("PSP_CLIENT_ID must be set"),
            psp_client_secret: env::var("PSP_CLIENT_SECRET")
                .expect("PSP_CLIENT_SECRET must be set"),
            psp_merchant_id: env::var("PSP_MERCHANT_ID")
                .expect("PSP_MERCHANT_ID must be set"),
            psp_environment,
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a number"),
            host: env::var("HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }

    pub fn get_psp_urls(&self) -> (String, String, String) {
        let base_url = if self.is_production() {
            "https://api.psp.example.ch"
        } else {
            "https://sandbox.psp.example.ch"
        };

        let auth_url = format!("{}/oauth/token", base_url);
        let capture_url = format!("{}/v1/payments/capture", base_url);
        let refund_url = format!("{}/v1/payments/refund", base_url);

        (auth_url, capture_url, refund_url)
    }

    pub fn is_production(&self) -> bool {
        self.psp_environment == "production"
    }

    pub fn get_config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.psp_environment,
            "is_production": self.is_production(),
            "merchant_id": self.psp_merchant_id,
            "client_id_set": !self.psp_client_id.is_empty(),
            "client_secret_set": !self.psp_client_secret.is_empty(),
            "port": self.port,
            "host": self.host,
        })
    }
}

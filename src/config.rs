use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_header: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub mail_from: String,
    pub verification_base_url: String,
    pub frontend_redirect_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        let sqlite_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "/opt/aspirasi/data.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "change-me-in-production".to_string());

        let token_header = env::var("TOKEN_HEADER")
            .unwrap_or_else(|_| "Authorization".to_string());

        let access_token_ttl_minutes = env::var("ACCESS_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60);
        let refresh_token_ttl_days = env::var("REFRESH_TOKEN_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(7);

        let smtp_host = env::var("SMTP_HOST").ok().filter(|v| !v.trim().is_empty());
        let smtp_port = env::var("SMTP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(587);
        let smtp_username = env::var("SMTP_USERNAME").ok();
        let smtp_password = env::var("SMTP_PASSWORD").ok();
        let mail_from = env::var("MAIL_FROM")
            .unwrap_or_else(|_| "noreply@aspirasi.local".to_string());

        let verification_base_url = env::var("VERIFICATION_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/verify-email".to_string());
        let frontend_redirect_url = env::var("FRONTEND_REDIRECT_URL")
            .unwrap_or_else(|_| "http://localhost:3000/home".to_string());

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_header,
            access_token_ttl_minutes,
            refresh_token_ttl_days,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            mail_from,
            verification_base_url,
            frontend_redirect_url,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}", path)
    }
}

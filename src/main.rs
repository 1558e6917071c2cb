use oidc_authz::app;
use oidc_authz::error::AppError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    app::run().await
}

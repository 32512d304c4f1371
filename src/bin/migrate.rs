use donorhub::config::Config;
use donorhub::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if it exists
    dotenvy::dotenv().ok();

    println!("Starting database migration...");

    let config = Config::from_env()?;
    let pool = db::init_pool(&config.database_url).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    println!("Migration complete.");
    Ok(())
}

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use bulk_user_upload::config::AppConfig;
use bulk_user_upload::resource::{self, BULK_UPLOAD_PATH};
use bulk_user_upload::startup;
use bulk_user_upload::upload::UploadSession;

#[derive(Parser, Debug)]
#[command(name = "bulk-user-upload")]
#[command(about = "Bulk user provisioning from CSV uploads")]
struct Args {
    /// Configuration file path (default: config.yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config file)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let (mut app_config, using_defaults) =
        if args.config == "config.yaml" && !std::path::Path::new("config.yaml").exists() {
            println!("No config.yaml found, using default configuration:");
            println!("   - In-memory SQLite database");
            println!("   - Account emails written to the log");
            (AppConfig::default_config(), true)
        } else {
            let config = AppConfig::load_from_file(&args.config)
                .map_err(|e| format!("Failed to load configuration: {}", e))?;
            (config, false)
        };

    if let Some(port) = args.port {
        app_config.server.port = port;
    }
    if let Some(host) = args.host {
        app_config.server.host = host;
    }

    if !using_defaults {
        println!("Configuration loaded:");
        println!("   Server: {}:{}", app_config.server.host, app_config.server.port);
        if let Some(db_config) = &app_config.backend.database {
            println!("   Backend: database/{} ({})", db_config.db_type, db_config.url);
        }
        println!(
            "   Field rule overrides: {}",
            app_config.upload.field_rules.len()
        );
    }

    let store = startup::initialize_store(&app_config).await?;
    let transport = startup::mail_transport(&app_config.email)?;
    let session = Arc::new(UploadSession::from_config(store, transport, &app_config)?);

    let app = resource::router(session, Arc::new(app_config.clone()));

    let host: std::net::IpAddr = app_config.server.host.parse().unwrap_or_else(|_| {
        eprintln!("Invalid host address: {}, using 127.0.0.1", app_config.server.host);
        [127, 0, 0, 1].into()
    });
    let addr = SocketAddr::from((host, app_config.server.port));
    println!("Bulk user upload listening on {}", addr);
    println!("   Upload: POST {}", BULK_UPLOAD_PATH);
    println!("   Format: GET {}", BULK_UPLOAD_PATH);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

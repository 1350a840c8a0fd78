use anyhow::Result;
use census_choropleth::{config, export, pipeline, render, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the colored GeoJSON (and optional PNG preview) for one region
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// State FIPS code, overrides the config
        #[arg(long)]
        state: Option<String>,
        /// County FIPS code, overrides the config
        #[arg(long)]
        county: Option<String>,
        /// Census variable to map, overrides the config
        #[arg(long)]
        variable: Option<String>,
    },
    /// Serve the dashboard and the map API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            config,
            state,
            county,
            variable,
        } => {
            info!("Generating map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            let request = pipeline::MapRequest::from_config(&app_config)
                .with_overrides(state, county, variable);

            // 1. Fetch + join + color
            let client = reqwest::Client::new();
            let layer = pipeline::build_map(&app_config, &request, &client).await?;

            // 2. Write outputs
            export::write_geojson(&app_config.output.geojson, &layer.features)?;
            info!(
                "Wrote {} features to {:?}",
                layer.features.len(),
                app_config.output.geojson
            );

            if let Some(png) = &app_config.output.preview_png {
                render::render_preview(
                    png,
                    &layer.features,
                    &app_config.pipeline.color_attribute,
                    app_config.output.preview_width,
                    app_config.output.preview_height,
                )?;
            }

            info!(
                "Generation complete! center = ({:.5}, {:.5}), range = [{}, {}]",
                layer.center.lon, layer.center.lat, layer.scale.min, layer.scale.max
            );
        }
        Commands::Serve { config } => {
            info!("Serving map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            server::start_server(app_config).await?;
        }
    }

    Ok(())
}

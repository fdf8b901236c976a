use std::path::PathBuf;

use anyhow::bail;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use query_router::query::{BoundingBox, Parameter, QueryRequest, SpatialBounds};

#[derive(Debug, Parser)]
#[clap(name = "query-router", version, about = "Live-first ocean data queries with replica fallback")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve one structured query and print the source-tagged result as JSON.
    Resolve(ResolveArgs),

    /// Print the replica size and, with --probe, live reachability.
    Status {
        /// Also issue a small live request to check reachability.
        #[clap(long)]
        probe: bool,
    },

    /// Load measurements from a JSON array file into the replica.
    Ingest {
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// min_lat,max_lat,min_lon,max_lon
    #[clap(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        conflicts_with = "center"
    )]
    pub bbox: Option<Vec<f64>>,

    /// lat,lon of a radius query (use with --radius)
    #[clap(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        requires = "radius"
    )]
    pub center: Option<Vec<f64>>,

    /// Radius in degrees around --center
    #[clap(long)]
    pub radius: Option<f64>,

    /// RFC 3339 start, inclusive
    #[clap(long)]
    pub start: DateTime<Utc>,

    /// RFC 3339 end, inclusive
    #[clap(long)]
    pub end: DateTime<Utc>,

    #[clap(long)]
    pub min_depth: Option<f64>,

    #[clap(long)]
    pub max_depth: Option<f64>,

    /// Parameters to return (comma-separated)
    #[clap(long, value_delimiter = ',', default_value = "temperature")]
    pub params: Vec<Parameter>,

    #[clap(long)]
    pub max_results: Option<usize>,
}

impl ResolveArgs {
    /// Untyped request; range validation happens in the router.
    pub fn to_request(&self) -> anyhow::Result<QueryRequest> {
        let bounds = match (&self.bbox, &self.center, self.radius) {
            (Some(b), None, _) => match b.as_slice() {
                [min_lat, max_lat, min_lon, max_lon] => SpatialBounds::Box(BoundingBox {
                    min_lat: *min_lat,
                    max_lat: *max_lat,
                    min_lon: *min_lon,
                    max_lon: *max_lon,
                }),
                _ => bail!("--bbox takes exactly four values"),
            },
            (None, Some(c), Some(radius_deg)) => match c.as_slice() {
                [center_lat, center_lon] => SpatialBounds::Radius {
                    center_lat: *center_lat,
                    center_lon: *center_lon,
                    radius_deg,
                },
                _ => bail!("--center takes exactly two values"),
            },
            _ => bail!("give either --bbox or --center with --radius"),
        };

        Ok(QueryRequest {
            bounds,
            start: self.start,
            end: self.end,
            min_depth_m: self.min_depth,
            max_depth_m: self.max_depth,
            parameters: self.params.clone(),
            max_results: self.max_results,
        })
    }
}

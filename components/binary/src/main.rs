// Copyright 2025 cloudraid
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod cmd;

use clap::{Parser, Subcommand};
use cloudraid_common::CLOUDRAID;
use snafu::Whatever;

use crate::cmd::{format::FormatArgs, ls::LsArgs, read::ReadArgs, write::WriteArgs};

#[derive(Debug, Parser)]
#[clap(
    name = CLOUDRAID,
    about = "striped, erasure-coded filesystem over remote storage backends",
    version
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Format(FormatArgs),
    Write(WriteArgs),
    Read(ReadArgs),
    Ls(LsArgs),
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    cloudraid_utils::logger::LoggingConfig::default().init_tracing_subscriber();
    let cli = Cli::parse();
    match cli.commands {
        Commands::Format(args) => args.run().await,
        Commands::Write(args) => args.run().await,
        Commands::Read(args) => args.run().await,
        Commands::Ls(args) => args.run().await,
    }
}

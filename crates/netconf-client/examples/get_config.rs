// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connect to a NETCONF server over plain TCP, fetch the running
//! configuration, and print it.

use anyhow::anyhow;
use clap::Parser;
use netconf_client::{
    rpc::{Datastore, Filter},
    NetconfClient, NetconfRpc, Reply, ReplyData, Timeout,
};

#[derive(clap::Parser, Debug)]
struct Args {
    #[arg(help = "Host address (IP or hostname)")]
    host: String,

    #[clap(short, long, default_value = "830")]
    port: u16,

    /// Subtree XML (starting with `<`) or XPath filter expression.
    #[clap(short, long)]
    filter: Option<String>,

    /// YANG schema search directory used as a last-resort module source.
    #[clap(short, long)]
    schemas: Option<String>,
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to set default tracing env filter");

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .try_init()
        .expect("Failed to register tracing subscriber");
}

pub fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut client = NetconfClient::new();
    if let Some(schemas) = &args.schemas {
        client.set_schema_searchpath(Some(schemas));
    }

    tracing::info!("connecting to {}:{}", args.host, args.port);
    let (session, outcome) = client.connect_tcp(&args.host, args.port, None)?;
    tracing::info!(
        "session {} established ({} peer capabilities, schema fill: {outcome:?})",
        session.id(),
        session.capabilities().len()
    );

    let rpc = NetconfRpc::GetConfig {
        source: Datastore::Running,
        filter: args.filter.as_deref().map(Filter::from),
        with_defaults: None,
    };
    let message_id = session.send_rpc(&rpc, Timeout::Millis(10_000))?;
    tracing::debug!("sent <get-config> with message-id {message_id}");

    match session.recv_reply(&rpc, message_id, Timeout::Millis(30_000))? {
        Reply::Data(ReplyData::Tree(tree)) => {
            println!("{tree}");
            Ok(())
        }
        Reply::Error(errors) => {
            for error in &errors {
                tracing::error!(
                    "rpc-error: type={:?} tag={:?} message={:?}",
                    error.error_type(),
                    error.error_tag(),
                    error.error_message()
                );
            }
            Err(anyhow!("<get-config> answered with {} error(s)", errors.len()))
        }
        other => Err(anyhow!("unexpected reply to <get-config>: {other:?}")),
    }
}

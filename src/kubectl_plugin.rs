//! `kubectl-graphdb`: a thin `kubectl` plugin for operators to inspect
//! managed clusters without reaching for `kubectl get <crd> -o yaml`.
//!
//! Talks to the same CRDs the controller reconciles; read-only, no
//! write path. Grounded on the REST surface's own DTOs so the two
//! front ends (HTTP, CLI) report identical fields.

use clap::{Parser, Subcommand};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};

use graphdb_operator::crd::{Backup, Cluster, Database};
use graphdb_operator::error::Result;

#[derive(Parser)]
#[command(name = "kubectl-graphdb", about = "Inspect graphdb-operator managed resources")]
struct Cli {
    /// Restrict to this namespace; unset lists across all namespaces.
    #[arg(long, short = 'n', global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List Cluster custom resources.
    GetClusters,
    /// List Database custom resources.
    GetDatabases,
    /// List Backup custom resources.
    GetBackups,
    /// Print full status detail for one Cluster.
    DescribeCluster { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::try_default().await.map_err(graphdb_operator::Error::KubeError)?;

    match cli.command {
        Command::GetClusters => get_clusters(client, cli.namespace.as_deref()).await,
        Command::GetDatabases => get_databases(client, cli.namespace.as_deref()).await,
        Command::GetBackups => get_backups(client, cli.namespace.as_deref()).await,
        Command::DescribeCluster { name } => describe_cluster(client, cli.namespace.as_deref(), &name).await,
    }
}

fn scoped<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

async fn get_clusters(client: Client, namespace: Option<&str>) -> Result<()> {
    let api: Api<Cluster> = scoped(client, namespace);
    let list = api.list(&ListParams::default()).await?;

    println!("{:<24}{:<16}{:<10}{:<10}{:<10}", "NAME", "NAMESPACE", "PHASE", "PRIMARIES", "SECONDARIES");
    for cluster in &list.items {
        let status = cluster.status.clone().unwrap_or_default();
        println!(
            "{:<24}{:<16}{:<10}{:<10}{:<10}",
            cluster.name_any(),
            cluster.namespace().unwrap_or_default(),
            status.phase,
            format!("{}/{}", status.ready_primaries, cluster.spec.topology.primaries),
            format!("{}/{}", status.ready_secondaries, cluster.spec.topology.secondaries),
        );
    }
    Ok(())
}

async fn get_databases(client: Client, namespace: Option<&str>) -> Result<()> {
    let api: Api<Database> = scoped(client, namespace);
    let list = api.list(&ListParams::default()).await?;

    println!("{:<24}{:<16}{:<20}{:<10}{:<10}", "NAME", "NAMESPACE", "CLUSTER", "PHASE", "IMPORTED");
    for db in &list.items {
        let status = db.status.clone().unwrap_or_default();
        println!(
            "{:<24}{:<16}{:<20}{:<10}{:<10}",
            db.name_any(),
            db.namespace().unwrap_or_default(),
            db.spec.cluster_ref,
            status.phase,
            status.data_imported,
        );
    }
    Ok(())
}

async fn get_backups(client: Client, namespace: Option<&str>) -> Result<()> {
    let api: Api<Backup> = scoped(client, namespace);
    let list = api.list(&ListParams::default()).await?;

    println!("{:<24}{:<16}{:<20}{:<10}{:<24}", "NAME", "NAMESPACE", "TARGET", "PHASE", "LAST BACKUP");
    for backup in &list.items {
        let status = backup.status.clone().unwrap_or_default();
        println!(
            "{:<24}{:<16}{:<20}{:<10}{:<24}",
            backup.name_any(),
            backup.namespace().unwrap_or_default(),
            backup.spec.target.name,
            status.phase,
            status.last_backup_time.unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

async fn describe_cluster(client: Client, namespace: Option<&str>, name: &str) -> Result<()> {
    let ns = namespace.unwrap_or("default");
    let api: Api<Cluster> = Api::namespaced(client, ns);
    let cluster = api.get(name).await?;
    let status = cluster.status.clone().unwrap_or_default();

    println!("Name:        {}", cluster.name_any());
    println!("Namespace:   {ns}");
    println!("Phase:       {}", status.phase);
    println!("Primaries:   {}/{}", status.ready_primaries, cluster.spec.topology.primaries);
    println!("Secondaries: {}/{}", status.ready_secondaries, cluster.spec.topology.secondaries);
    if let Some(message) = &status.message {
        println!("Message:     {message}");
    }
    if let Some(upgrade) = &status.upgrade {
        println!("Upgrade:     {:?}", upgrade.phase);
    }
    println!("Conditions:");
    for condition in &status.conditions {
        println!("  {} = {} ({})", condition.type_, condition.status, condition.reason);
    }
    Ok(())
}

//! PKI Tree - Self-hosted Certificate Authority
//!
//! Command line front end for the certificate hierarchy. Every command opens
//! the snapshot named in the configuration, performs one operation and exits.
//!
//! ```bash
//! pki-tree root --cn "Yeka Root CA"
//! pki-tree issue --parent 1 --cn "Go Web" --ip 127.0.0.1 --dns cc.local
//! pki-tree verify 2
//! pki-tree export 2 --out exports
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pki_tree::certificate_factory::{name_entries, CertificateFactory};
use pki_tree::certificate_info::{CertificateInfo, CertificateRecord};
use pki_tree::configs::AppConfig;
use pki_tree::encoding::decode_certificate;
use pki_tree::export;
use pki_tree::file_storage::FileStorage;
use pki_tree::key_generator::KeyGenerator;
use pki_tree::manager::Manager;
use pki_tree::storage::ParentFilter;

#[derive(Debug, Parser)]
#[command(name = "pki-tree", version, about = "Self-hosted certificate authority hierarchy")]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a self-signed root CA
    Root(CertificateArgs),
    /// Issue a certificate signed by an existing CA
    Issue {
        #[arg(long)]
        parent: u64,
        #[command(flatten)]
        certificate: CertificateArgs,
    },
    /// List records, optionally only the children of one parent (0 = roots)
    List {
        #[arg(long)]
        parent: Option<u64>,
    },
    /// Case-insensitive search on common and DNS names
    Search {
        query: String,
        #[arg(long)]
        parent: Option<u64>,
    },
    /// Print one record
    Show { id: u64 },
    /// Verify the chain of trust from a record up to its root
    Verify { id: u64 },
    /// Write a record's download bundle
    Export {
        id: u64,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write separate .crt/.key files instead of the bundle
        #[arg(long)]
        split: bool,
    },
}

#[derive(Debug, Args)]
struct CertificateArgs {
    #[arg(long)]
    cn: String,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    org: Option<String>,
    #[arg(long = "ip")]
    ips: Vec<String>,
    #[arg(long = "dns")]
    dns_names: Vec<String>,
    /// Validity in days; the configured default when omitted
    #[arg(long)]
    days: Option<u32>,
    /// Allow the certificate to sign children (ignored for roots)
    #[arg(long)]
    ca: bool,
}

impl CertificateArgs {
    fn into_info(self, config: &AppConfig, default_days: u32) -> CertificateInfo {
        let defaults = &config.defaults;
        let mut info = CertificateInfo::new(self.cn, self.days.unwrap_or(default_days))
            .country(self.country.unwrap_or_else(|| defaults.country.clone()))
            .organization(self.org.unwrap_or_else(|| defaults.organization.clone()))
            .certificate_authority(self.ca);
        info.ip_addresses = self.ips;
        info.dns_names = self.dns_names;
        info
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;
    let manager = open_manager(&config)?;

    match cli.command {
        Command::Root(args) => {
            let info = args.into_info(&config, config.defaults.root_validity_days);
            let record = manager
                .add_root_ca(info)
                .context("Failed to create root CA")?;
            println!("✓ Root CA '{}' stored with id {}", record.info.common_name, record.id);
        }
        Command::Issue {
            parent,
            certificate,
        } => {
            let info = certificate.into_info(&config, config.defaults.leaf_validity_days);
            let record = manager
                .add_server_certificate(info, parent)
                .with_context(|| format!("Failed to issue certificate under {}", parent))?;
            println!(
                "✓ Certificate '{}' stored with id {} (parent {})",
                record.info.common_name, record.id, record.parent_id
            );
        }
        Command::List { parent } => print_records(&manager.search("", filter(parent))?),
        Command::Search { query, parent } => {
            print_records(&manager.search(&query, filter(parent))?)
        }
        Command::Show { id } => show(&manager, id)?,
        Command::Verify { id } => {
            if manager.verify(id)? {
                println!("✓ Chain of trust for {} verified", id);
            } else {
                bail!("Chain of trust for {} failed verification", id);
            }
        }
        Command::Export { id, out, split } => {
            let record = manager.load(id)?;
            let directory = out.unwrap_or_else(|| config.exports.directory.clone());
            if split {
                let (certificate, key) = export::write_pair(&directory, &record)?;
                println!("✓ Wrote {} and {}", certificate.display(), key.display());
            } else {
                let path = export::write_bundle(&directory, &record)?;
                println!("✓ Wrote {}", path.display());
            }
        }
    }

    Ok(())
}

fn open_manager(config: &AppConfig) -> Result<Manager<FileStorage>> {
    let keys = KeyGenerator::new(config.keys.algorithm()).context("Invalid [keys] configuration")?;
    let storage = FileStorage::open(&config.storage.snapshot_path).with_context(|| {
        format!(
            "Failed to open certificate store {}",
            config.storage.snapshot_path.display()
        )
    })?;
    Ok(Manager::new(storage, CertificateFactory::new(keys)))
}

fn filter(parent: Option<u64>) -> ParentFilter {
    match parent {
        None => ParentFilter::All,
        Some(0) => ParentFilter::RootsOnly,
        Some(id) => ParentFilter::ChildrenOf(id),
    }
}

fn print_records(records: &[CertificateRecord]) {
    if records.is_empty() {
        println!("No certificates found.");
        return;
    }
    println!("{:>5}  {:>6}  {:<3}  {:<25}  COMMON NAME", "ID", "PARENT", "CA", "EXPIRES");
    for record in records {
        println!(
            "{:>5}  {:>6}  {:<3}  {:<25}  {}",
            record.id,
            record.parent_id,
            if record.can_sign() { "yes" } else { "no" },
            record.info.expires_at.to_rfc3339(),
            record.info.common_name
        );
    }
}

fn show(manager: &Manager<FileStorage>, id: u64) -> Result<()> {
    let record = manager.load(id)?;
    let certificate = decode_certificate(&record.certificate_bytes)?;
    let subject = name_entries(certificate.subject_name())?;
    let issuer = name_entries(certificate.issuer_name())?;
    let join = |entries: Vec<(openssl::nid::Nid, String)>| {
        entries
            .into_iter()
            .map(|(nid, value)| format!("{}={}", nid.short_name().unwrap_or("?"), value))
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!("\n=== Certificate {} ===", record.id);
    println!("Parent:       {}", record.parent_id);
    println!("Subject:      {}", join(subject));
    println!("Issuer:       {}", join(issuer));
    println!("CA:           {}", record.can_sign());
    println!("Expires:      {}", record.info.expires_at.to_rfc3339());
    if !record.info.ip_addresses.is_empty() {
        println!("IP addresses: {}", record.info.ip_addresses.join(", "));
    }
    if !record.info.dns_names.is_empty() {
        println!("DNS names:    {}", record.info.dns_names.join(", "));
    }
    println!("SHA-256:      {}", export::fingerprint(&record)?);

    let chain: Vec<String> = manager
        .chain(id)?
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    println!("Chain:        {}", chain.join(" -> "));
    if manager.verify(id)? {
        println!("✓ Chain of trust verified");
    } else {
        println!("✗ Chain of trust verification failed");
    }
    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
mod auth;
use pixlock::{
    CancelToken, KdfParams, ProgressEvent, ProgressSink, Vault, default_vault_dir,
};
use std::path::PathBuf;

#[derive(Debug, clap::Args)]
struct Argon2Args {
    /// Argon2 memory cost in KiB (default: 65536)
    #[arg(long = "argon-mem")]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 3)
    #[arg(long = "argon-time")]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 1)
    #[arg(long = "argon-parallelism")]
    parallelism: Option<u32>,
}

impl Argon2Args {
    fn to_kdf_params(&self) -> anyhow::Result<KdfParams> {
        let default = KdfParams::default();

        Ok(KdfParams::new(
            self.mem_cost_kib.unwrap_or(default.mem_cost_kib()),
            self.time_cost.unwrap_or(default.time_cost()),
            self.parallelism.unwrap_or(default.parallelism()),
        )?)
    }
}

fn resolve_vault_dir(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => default_vault_dir(),
    }
}

#[derive(Debug, Parser)]
#[command(name = "pixlock")]
#[command(
    version,
    about = "Encrypted offline media vault with password-sealed backups."
)]
struct Cli {
    /// Path to the vault directory
    #[arg(long, global = true, value_name = "PATH", env = "PIXLOCK_VAULT")]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates a new vault
    Init {
        #[command(flatten)]
        argon2: Argon2Args,
    },

    /// Encrypts media files into the vault
    #[command(arg_required_else_help = true)]
    Import { files: Vec<PathBuf> },

    /// Lists vault contents
    List,

    /// Decrypts a media object to a file
    #[command(arg_required_else_help = true)]
    Export { id: String, out: PathBuf },

    /// Decrypts a media object to stdout
    #[command(arg_required_else_help = true)]
    Cat { id: String },

    /// Removes a media object from the vault
    #[command(arg_required_else_help = true)]
    Remove { id: String },

    /// Writes a full backup archive
    #[command(arg_required_else_help = true)]
    Backup { out: PathBuf },

    /// Merges a backup archive into the vault
    #[command(arg_required_else_help = true)]
    Restore {
        archive: PathBuf,

        /// Password the backup was sealed with, when it differs from
        /// the vault password
        #[arg(long)]
        backup_password: Option<String>,
    },

    /// Rotates the vault password, re-encrypting all media
    ChangePassword,
}

/// Wires Ctrl-C to a cancel token and progress events to stderr.
fn batch_observer() -> Result<(CancelToken, ProgressSink, std::thread::JoinHandle<()>)> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let (sink, rx) = ProgressSink::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            match event {
                ProgressEvent::Item { done, total } => eprintln!("  {done}/{total}"),
                ProgressEvent::Finished { done, total } => {
                    eprintln!("done ({done}/{total} items)")
                }
            }
        }
    });
    Ok((cancel, sink, printer))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let vault_dir = resolve_vault_dir(args.vault.clone())?;
    let password = auth::read_password()?;

    match args.command {
        Commands::Init { argon2 } => {
            let kdf = argon2.to_kdf_params()?;
            Vault::init_with_kdf(&vault_dir, &password, kdf)?;
            println!("vault initialized at {}", vault_dir.display());
        }
        Commands::Import { files } => {
            let mut vault = Vault::open(&vault_dir, &password)?;
            for file in files {
                let id = vault.import(&file)?;
                println!("{id}  {}", file.display());
            }
        }
        Commands::List => {
            let vault = Vault::open(&vault_dir, &password)?;
            let media = vault.list()?;
            if media.is_empty() {
                println!("vault is empty");
                return Ok(());
            }
            for m in media {
                println!(
                    "{}  {:>10}  {:?}  {}",
                    m.identifier, m.size_bytes, m.kind, m.display_name
                );
            }
        }
        Commands::Export { id, out } => {
            let vault = Vault::open(&vault_dir, &password)?;
            vault.export(&id, &out)?;
            println!("exported '{id}' to {}", out.display());
        }
        Commands::Cat { id } => {
            let vault = Vault::open(&vault_dir, &password)?;
            vault.export_to(&id, std::io::stdout().lock())?;
        }
        Commands::Remove { id } => {
            let mut vault = Vault::open(&vault_dir, &password)?;
            vault.delete(&id)?;
            println!("removed '{id}'");
        }
        Commands::Backup { out } => {
            let vault = Vault::open(&vault_dir, &password)?;
            let (cancel, sink, printer) = batch_observer()?;
            let report = vault.backup(&out, &cancel, &sink)?;
            drop(sink);
            let _ = printer.join();

            if report.cancelled {
                eprintln!("backup cancelled");
            }
            println!(
                "backup written to {} ({} blobs, {} missing)",
                out.display(),
                report.written,
                report.missing
            );
        }
        Commands::Restore {
            archive,
            backup_password,
        } => {
            let mut vault = Vault::open(&vault_dir, &password)?;
            let backup_password = match backup_password {
                Some(pw) => zeroize::Zeroizing::new(pw),
                None => auth::read_extra_password("Backup password: ")?,
            };

            let (cancel, sink, printer) = batch_observer()?;
            let report = vault.restore(&archive, &backup_password, &cancel, &sink)?;
            drop(sink);
            let _ = printer.join();

            if report.cancelled {
                eprintln!("restore cancelled");
            }
            println!(
                "restored {} blobs ({} errors, {} skipped)",
                report.restored, report.errors, report.skipped
            );
        }
        Commands::ChangePassword => {
            let mut vault = Vault::open(&vault_dir, &password)?;
            let new_password = auth::read_new_password_with_confirmation()?;

            let (cancel, sink, printer) = batch_observer()?;
            let report = vault.change_password(&password, &new_password, &cancel, &sink)?;
            drop(sink);
            let _ = printer.join();

            if report.cancelled {
                eprintln!("password change cancelled; run again to finish re-encryption");
            } else if report.failures_occurred() {
                eprintln!(
                    "password changed, but {} items could not be re-encrypted: {}",
                    report.failed.len(),
                    report.failed.join(", ")
                );
            } else {
                println!("password changed ({} items re-encrypted)", report.processed);
            }
        }
    }

    Ok(())
}

//! Locafoto - CLI
//!
//! Command-line interface for vault and shared-file operations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use locafoto_keyvault::crypto::DEFAULT_ITERATIONS;
use locafoto_keyvault::{KdfParams, RawKey};
use locafoto_vault::envelope::{self, LfsContainer, LFKEY_EXTENSION, LFS_EXTENSION};
use locafoto_vault::{LocafotoVault, VaultConfig, VaultError};

#[derive(Parser)]
#[command(name = "locafoto")]
#[command(version = locafoto_vault::VERSION)]
#[command(about = "Locafoto - named keys and encrypted shared photos")]
struct Cli {
    /// Vault path
    #[arg(long, global = true, env = "LOCAFOTO_VAULT", default_value = "./locafoto_vault")]
    vault: PathBuf,

    /// PIN code
    #[arg(short, long, global = true, env = "LOCAFOTO_PIN", hide_env_values = true)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault and set its PIN
    Init {
        /// PBKDF2 iterations
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,

        /// Accept .lfs files with an empty payload
        #[arg(long)]
        allow_empty_payload: bool,
    },

    /// Check the PIN without unlocking anything
    VerifyPin,

    /// Generate a new named key
    CreateKey { name: String },

    /// Import a key from its hex text form
    ImportKey {
        name: String,

        /// 64 hex characters
        #[arg(long)]
        hex: String,
    },

    /// Import a .lfkey shared key file
    ImportKeyFile { path: PathBuf },

    /// Export a named key as a .lfkey file
    ExportKey { name: String, output: PathBuf },

    /// List named keys, newest first
    ListKeys,

    /// Delete a named key (refused while imported files use it)
    DeleteKey { name: String },

    /// Encrypt a file (or every photo in a directory) under a named key
    Encrypt {
        name: String,
        /// File, or directory of photos
        input: PathBuf,
        /// Output .lfs, or output directory for a directory input
        output: Option<PathBuf>,
    },

    /// Decrypt an .lfs with the key it names
    Decrypt { input: PathBuf, output: PathBuf },

    /// Import a received .lfs into the vault
    Import { input: PathBuf },

    /// Show imported files that use a key
    Usages { name: String },

    /// Delete an imported file and its usage records
    Forget { payload_id: Uuid },

    /// Write a fresh .lfkey (no vault)
    NewKeyFile { name: String, output: Option<PathBuf> },

    /// Encrypt with a .lfkey (no vault)
    SealFile {
        key_file: PathBuf,
        /// File, or directory of photos
        input: PathBuf,
        /// Output .lfs, or output directory for a directory input
        output: Option<PathBuf>,
    },

    /// Decrypt with a .lfkey (no vault)
    OpenFile {
        key_file: PathBuf,
        input: PathBuf,
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn require_pin(pin: Option<&str>) -> Result<&str> {
    match pin {
        Some(pin) if !pin.is_empty() => Ok(pin),
        _ => bail!("a PIN is required (--pin or LOCAFOTO_PIN)"),
    }
}

fn open_unlocked(path: &Path, pin: Option<&str>) -> Result<LocafotoVault> {
    let pin = require_pin(pin)?;
    let vault = LocafotoVault::open(path)
        .with_context(|| format!("opening vault at {}", path.display()))?;
    vault.unlock(pin)?;
    Ok(vault)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Photo extensions picked up when sealing a directory
const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "webp"];

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// (input, output) pairs to seal. A directory input yields `<stem>.lfs` for
/// each photo in it, written to `output` (default: the input directory).
fn seal_targets(input: &Path, output: Option<PathBuf>) -> Result<Vec<(PathBuf, PathBuf)>> {
    if !input.is_dir() {
        let output = output.unwrap_or_else(|| input.with_extension(LFS_EXTENSION));
        return Ok(vec![(input.to_path_buf(), output)]);
    }

    let mut photos = Vec::new();
    for entry in fs::read_dir(input).with_context(|| format!("reading {}", input.display()))? {
        let path = entry?.path();
        if path.is_file() && is_photo(&path) {
            photos.push(path);
        }
    }
    if photos.is_empty() {
        bail!("no image files found in directory: {}", input.display());
    }
    photos.sort();

    let out_dir = output.unwrap_or_else(|| input.to_path_buf());
    fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    println!("📁 Found {} image file(s) to encrypt", photos.len());

    Ok(photos
        .into_iter()
        .map(|photo| {
            let mut name = photo.file_stem().unwrap_or_default().to_os_string();
            name.push(".");
            name.push(LFS_EXTENSION);
            let target = out_dir.join(name);
            (photo, target)
        })
        .collect())
}

fn run(cli: Cli) -> Result<()> {
    let pin = cli.pin.as_deref();

    match cli.command {
        Commands::Init {
            iterations,
            allow_empty_payload,
        } => {
            println!("🔐 Creating new Locafoto vault...");
            let config = VaultConfig {
                kdf: KdfParams::new(iterations)?,
                allow_empty_payload,
                ..Default::default()
            };
            LocafotoVault::create(&cli.vault, require_pin(pin)?, config)?;
            println!("✅ Vault created at: {}", cli.vault.display());
        }

        Commands::VerifyPin => {
            let vault = LocafotoVault::open(&cli.vault)?;
            if vault.verify_pin(require_pin(pin)?)? {
                println!("✅ PIN is correct");
            } else {
                bail!(VaultError::InvalidPin);
            }
        }

        Commands::CreateKey { name } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let key = vault.create_key(&name)?;
            println!("🔑 Created key '{}' ({})", key.name, key.id);
        }

        Commands::ImportKey { name, hex } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let key = vault.import_key_hex(&name, &hex)?;
            println!("🔑 Imported key '{}' ({})", key.name, key.id);
        }

        Commands::ImportKeyFile { path } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let key = vault.import_shared_key(&read(&path)?)?;
            println!("🔑 Imported key '{}' ({})", key.name, key.id);
        }

        Commands::ExportKey { name, output } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let data = vault.export_shared_key(&name)?;
            write(&output, &data)?;
            println!("📤 Exported key '{}' to: {}", name, output.display());
        }

        Commands::ListKeys => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let keys = vault.list_keys()?;

            if keys.is_empty() {
                println!("📭 No keys in vault");
            } else {
                println!("🔑 Keys in vault ({}):", keys.len());
                println!("{:-<60}", "");
                for key in keys {
                    println!(
                        "{} - {} (created {}, used {} times)",
                        key.name,
                        key.id,
                        key.created_at.format("%Y-%m-%d %H:%M"),
                        key.usage_count
                    );
                }
            }
        }

        Commands::DeleteKey { name } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            vault.delete_key(&name)?;
            println!("🗑️ Deleted key '{}'", name);
        }

        Commands::Encrypt {
            name,
            input,
            output,
        } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            for (input, output) in seal_targets(&input, output)? {
                let sealed = vault.seal_shared(&name, &read(&input)?)?;
                write(&output, &sealed)?;
                println!("🔒 Encrypted {} with key '{}'", input.display(), name);
                println!("   Output: {} ({} bytes)", output.display(), sealed.len());
            }
        }

        Commands::Decrypt { input, output } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let (key_name, plaintext) = vault.open_shared(&read(&input)?)?;
            write(&output, &plaintext)?;
            println!("🔓 Decrypted with key '{}' to: {}", key_name, output.display());
        }

        Commands::Import { input } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let payload = vault.import_shared_file(&read(&input)?, file_name(&input), None)?;
            println!("📥 Imported {}", input.display());
            println!("   ID: {}", payload.id);
            println!(
                "   Key: {}",
                payload.key_name.as_deref().unwrap_or("(master)")
            );
        }

        Commands::Usages { name } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let usages = vault.usages_for(&name)?;

            if usages.is_empty() {
                println!("📭 Key '{}' is not used by any imported file", name);
            } else {
                println!("📷 Files using key '{}' ({}):", name, usages.len());
                for usage in usages {
                    println!(
                        "{} - {} ({} bytes, {})",
                        usage.payload_id,
                        usage.original_filename.as_deref().unwrap_or("unnamed"),
                        usage.file_size,
                        usage.imported_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        Commands::Forget { payload_id } => {
            let vault = open_unlocked(&cli.vault, pin)?;
            let removed = vault.delete_photo(payload_id)?;
            println!("🗑️ Forgot {} ({} usage records removed)", payload_id, removed);
        }

        Commands::NewKeyFile { name, output } => {
            let mut output = output.unwrap_or_else(|| PathBuf::from(&name));
            if output.extension().and_then(|e| e.to_str()) != Some(LFKEY_EXTENSION) {
                let mut with_ext = output.into_os_string();
                with_ext.push(".");
                with_ext.push(LFKEY_EXTENSION);
                output = PathBuf::from(with_ext);
            }

            let key = RawKey::generate()?;
            write(&output, &envelope::encode_shared_key(&name, &key)?)?;
            println!("🔑 Created key file for '{}': {}", name, output.display());
        }

        Commands::SealFile {
            key_file,
            input,
            output,
        } => {
            let shared = envelope::decode_shared_key(&read(&key_file)?)?;
            for (input, output) in seal_targets(&input, output)? {
                let sealed =
                    LfsContainer::seal(&shared.name, &read(&input)?, &shared.key)?.to_bytes()?;
                write(&output, &sealed)?;
                println!("🔒 Encrypted {} with key '{}'", input.display(), shared.name);
                println!("   Output: {} ({} bytes)", output.display(), sealed.len());
            }
        }

        Commands::OpenFile {
            key_file,
            input,
            output,
        } => {
            let shared = envelope::decode_shared_key(&read(&key_file)?)?;
            let container = envelope::decode_lfs(&read(&input)?)?;
            if container.key_name != shared.name {
                bail!(VaultError::KeyNotFound(container.key_name));
            }
            let plaintext = container.open(&shared.key)?;
            write(&output, &plaintext)?;
            println!("🔓 Decrypted with key '{}' to: {}", shared.name, output.display());
        }
    }

    Ok(())
}

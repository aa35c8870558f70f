//! Acquires the Proxmox VE installer image.
use crate::error::{Error, Result};
use regex::Regex;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

pub const PROXMOX_DOWNLOAD_PAGE: &str =
    "https://www.proxmox.com/en/downloads/proxmox-virtual-environment/iso";

static ISO_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"https://enterprise\.proxmox\.com/iso/[^"]*\.iso"#).ok());

/// Where downloaded images live, relative to the repository root. Never
/// copied onto the stick.
pub const DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_ISO_NAME: &str = "proxmox-ve_latest.iso";

const BLOCK_SIZE: usize = 8192;

fn client() -> Result<Client> {
    Client::builder()
        .user_agent("Mozilla/5.0")
        .build()
        .map_err(|e| Error::Download(e.to_string()))
}

/// Extracts the first installer ISO link from the download page HTML.
pub fn find_iso_link(page: &str) -> Option<String> {
    let link = ISO_LINK.as_ref()?.find(page)?;
    Some(link.as_str().to_string())
}

/// Scrapes the Proxmox site for the current installer ISO URL.
pub fn latest_iso_url() -> Result<String> {
    log::info!("fetching latest Proxmox VE ISO download link");
    let page = client()?
        .get(PROXMOX_DOWNLOAD_PAGE)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| Error::Download(format!("could not scrape Proxmox site: {e}")))?;

    find_iso_link(&page)
        .ok_or_else(|| Error::Download("no ISO link found on the download page".to_string()))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Downloads `url` to `dest`, returning the number of bytes written.
///
/// `on_progress` is called after every block with
/// `(bytes_so_far, block_size, total_size)`; the total is `None` when the
/// server does not send a length. Data goes to `<dest>.part` first and is
/// renamed into place only once complete, so `dest` never holds a truncated
/// image. Clearing `running` stops the transfer with [`Error::Cancelled`].
pub fn download<F>(
    url: &str,
    dest: &Path,
    running: &AtomicBool,
    mut on_progress: F,
) -> Result<u64>
where
    F: FnMut(u64, usize, Option<u64>),
{
    log::info!("downloading {url}");
    let mut response = client()?
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Download(format!("{url}: {e}")))?;
    let total = response.content_length();

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(dest);
    let result = (|| -> Result<u64> {
        let mut file = File::create(&partial)?;
        let mut buffer = [0u8; BLOCK_SIZE];
        let mut downloaded: u64 = 0;
        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }
            let n = response
                .read(&mut buffer)
                .map_err(|e| Error::Download(format!("{url}: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
            downloaded += n as u64;
            on_progress(downloaded, BLOCK_SIZE, total);
        }
        file.flush()?;
        Ok(downloaded)
    })();

    match result {
        Ok(downloaded) => {
            fs::rename(&partial, dest)?;
            log::info!("download complete: {downloaded} bytes");
            Ok(downloaded)
        }
        Err(e) => {
            fs::remove_file(&partial).ok();
            Err(e)
        }
    }
}

//! WAL maintenance and app lock commands

use anyhow::{bail, Result};
use colored::*;
use shortcuts_store::types::AppLock;
use shortcuts_store::Store;

use crate::output::{print_single, print_success, print_warning};

pub async fn stats(store: &Store) -> Result<()> {
    print_single(&store.metrics().await)
}

pub async fn verify(store: &Store) -> Result<()> {
    let report = store.verify().await?;
    if report.is_clean() {
        print_success(&format!(
            "{} records verified across {} segment(s)",
            report.verified_records, report.segments_checked
        ));
    } else {
        println!("{} {} corrupted record(s)", "✗".red(), report.corrupted_records);
        for (segment, offset) in &report.corrupted_offsets {
            println!("  segment {} offset {}", segment, offset);
        }
    }

    let violations = store.snapshot().invariant_violations();
    for violation in &violations {
        print_warning(violation);
    }
    if !report.is_clean() || !violations.is_empty() {
        bail!("store failed verification");
    }
    Ok(())
}

pub async fn compact(store: &Store) -> Result<()> {
    let sequence = store.compact().await?;
    print_success(&format!("Snapshot written at sequence {}", sequence));
    Ok(())
}

pub async fn lock(store: &Store, password: &str) -> Result<()> {
    store.lock(AppLock::hash_password(password)).await?;
    print_success("App locked");
    Ok(())
}

pub async fn unlock(store: &Store, password: &str) -> Result<()> {
    if !store.unlock(password).await? {
        bail!("password does not match");
    }
    print_success("App unlocked");
    Ok(())
}

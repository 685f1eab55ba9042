//! Pending execution queue commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use shortcuts_store::types::{ExecutionId, ExecutionRequest, ShortcutId};
use shortcuts_store::{ExecutionQueue, Store};
use tabled::Tabled;

use crate::output::{print_output, print_success, print_warning, OutputFormat};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending executions in run order
    List,

    /// Request a run of a shortcut
    Enqueue {
        shortcut: u64,
        /// What triggered the run
        #[arg(short, long)]
        trigger: Option<String>,
    },

    /// Remove one pending execution
    Remove { execution: u64 },

    /// Remove every pending execution of a shortcut
    Clear { shortcut: u64 },
}

#[derive(Debug, Serialize, Tabled)]
struct ExecutionRow {
    id: u64,
    shortcut: u64,
    enqueued_at: String,
    trigger: String,
    attempt: u32,
}

pub async fn execute(command: QueueCommands, store: &Store, format: OutputFormat) -> Result<()> {
    let queue = ExecutionQueue::new(store.clone());
    match command {
        QueueCommands::List => {
            let rows = queue
                .dequeue_all()
                .into_iter()
                .map(|e| ExecutionRow {
                    id: e.id.0,
                    shortcut: e.shortcut_id.0,
                    enqueued_at: e.enqueued_at.to_rfc3339(),
                    trigger: e.request.trigger.unwrap_or_default(),
                    attempt: e.request.try_number,
                })
                .collect();
            print_output(rows, format)
        }

        QueueCommands::Enqueue { shortcut, trigger } => {
            let request = ExecutionRequest {
                trigger,
                ..Default::default()
            };
            let execution = queue.enqueue_with(ShortcutId(shortcut), request).await?;
            print_success(&format!("Queued {} for {}", execution.id, execution.shortcut_id));
            Ok(())
        }

        QueueCommands::Remove { execution } => {
            let id = ExecutionId(execution);
            if queue.remove(id).await? {
                print_success(&format!("Removed {}", id));
            } else {
                print_warning(&format!("{} is not pending", id));
            }
            Ok(())
        }

        QueueCommands::Clear { shortcut } => {
            let removed = queue.remove_for_shortcut(ShortcutId(shortcut)).await?;
            print_success(&format!("Removed {} pending execution(s)", removed));
            Ok(())
        }
    }
}

//! Listing and reordering categories, shortcuts and variables

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use shortcuts_store::types::{CategoryId, ShortcutId, VariableId};
use shortcuts_store::Store;
use tabled::Tabled;

use crate::output::{print_output, print_success, print_warning, OutputFormat};

#[derive(Subcommand)]
pub enum CollectionCommands {
    /// List categories in display order
    Categories,

    /// List shortcuts, optionally limited to one category
    Shortcuts {
        #[arg(short, long)]
        category: Option<u64>,
    },

    /// List global variables in display order
    Variables,

    /// Move a shortcut within or across categories
    Move {
        shortcut: u64,
        /// Target category (defaults to the current one)
        #[arg(short, long)]
        category: Option<u64>,
        /// Zero-based position, clamped; appends when omitted
        #[arg(short, long)]
        position: Option<usize>,
    },

    /// Reorder a category
    MoveCategory {
        category: u64,
        #[arg(short, long)]
        position: Option<usize>,
    },

    /// Reorder a variable
    MoveVariable {
        variable: u64,
        #[arg(short, long)]
        position: Option<usize>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct CategoryRow {
    id: u64,
    name: String,
    layout: String,
    shortcuts: usize,
}

#[derive(Debug, Serialize, Tabled)]
struct ShortcutRow {
    id: u64,
    category: String,
    name: String,
    method: String,
    url: String,
}

#[derive(Debug, Serialize, Tabled)]
struct VariableRow {
    id: u64,
    key: String,
    kind: String,
    title: String,
}

pub async fn execute(command: CollectionCommands, store: &Store, format: OutputFormat) -> Result<()> {
    match command {
        CollectionCommands::Categories => {
            let rows = store
                .categories()
                .into_iter()
                .map(|c| CategoryRow {
                    id: c.id.0,
                    name: c.name,
                    layout: format!("{:?}", c.layout_type).to_lowercase(),
                    shortcuts: c.shortcuts.len(),
                })
                .collect();
            print_output(rows, format)
        }

        CollectionCommands::Shortcuts { category } => {
            let state = store.snapshot();
            if let Some(id) = category {
                if state.category(CategoryId(id)).is_none() {
                    bail!("category {} not found", CategoryId(id));
                }
            }
            let rows = state
                .shortcuts()
                .into_iter()
                .filter_map(|s| {
                    let owner = state.owner_of(s.id);
                    if category.is_some() && owner.map(|c| c.0) != category {
                        return None;
                    }
                    Some(ShortcutRow {
                        id: s.id.0,
                        category: owner.map_or_else(|| "-".to_string(), |c| c.to_string()),
                        name: s.name.clone(),
                        method: format!("{:?}", s.method).to_uppercase(),
                        url: s.url.clone(),
                    })
                })
                .collect();
            print_output(rows, format)
        }

        CollectionCommands::Variables => {
            let rows = store
                .variables()
                .into_iter()
                .map(|v| VariableRow {
                    id: v.id.0,
                    key: v.key,
                    kind: format!("{:?}", v.variable_type).to_lowercase(),
                    title: v.title,
                })
                .collect();
            print_output(rows, format)
        }

        CollectionCommands::Move {
            shortcut,
            category,
            position,
        } => {
            let id = ShortcutId(shortcut);
            let moved = store
                .move_shortcut(id, category.map(CategoryId), position)
                .await?;
            report(moved, &format!("Moved {}", id));
            Ok(())
        }

        CollectionCommands::MoveCategory { category, position } => {
            let id = CategoryId(category);
            report(store.move_category(id, position).await?, &format!("Moved {}", id));
            Ok(())
        }

        CollectionCommands::MoveVariable { variable, position } => {
            let id = VariableId(variable);
            report(store.move_variable(id, position).await?, &format!("Moved {}", id));
            Ok(())
        }
    }
}

fn report(changed: bool, message: &str) {
    if changed {
        print_success(message);
    } else {
        print_warning("Nothing moved, id or category not found");
    }
}

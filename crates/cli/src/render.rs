//! Plain-text tables for terminal output.

use comfyqueue_client::view::{DashboardView, JobRow, Listing, NodeRow, StatusTone};
use comfyqueue_core::models::user::User;

pub fn print_jobs(jobs: &Listing<JobRow>) {
    match jobs {
        Listing::Empty(marker) => println!("{marker}"),
        Listing::Items(rows) => {
            println!(
                "{:<6} {:<32} {:<12} {:<11} NODE",
                "ID", "FILE", "USER", "STATUS"
            );
            println!("{}", "-".repeat(72));
            for row in rows {
                println!(
                    "{:<6} {:<32} {:<12} {:<11} {}",
                    row.id,
                    truncate(&row.filename, 32),
                    truncate(&row.owner, 12),
                    format!("{}{}", tone_marker(row.tone), row.status),
                    row.node,
                );
            }
        }
    }
}

pub fn print_nodes(nodes: &Listing<NodeRow>) {
    match nodes {
        Listing::Empty(marker) => println!("{marker}"),
        Listing::Items(rows) => {
            for row in rows {
                let check = if row.enabled { "[x]" } else { "[ ]" };
                println!("{check} #{:<4} {}", row.id, row.label);
            }
        }
    }
}

pub fn print_dashboard(view: &DashboardView) {
    println!("Nodes");
    print_nodes(&view.nodes);
    println!();
    println!("Job Queue");
    print_jobs(&view.jobs);
}

pub fn print_users(users: &[User]) {
    if users.is_empty() {
        println!("No users.");
        return;
    }
    println!("{:<6} {:<24} ROLE", "ID", "USERNAME");
    println!("{}", "-".repeat(40));
    for user in users {
        println!("{:<6} {:<24} {}", user.id, truncate(&user.username, 24), user.role);
    }
}

fn tone_marker(tone: StatusTone) -> &'static str {
    match tone {
        StatusTone::Warning => "! ",
        StatusTone::Info => "> ",
        StatusTone::Success => "  ",
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

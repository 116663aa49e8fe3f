use anyhow::{Context, Result};
use chrono::NaiveDate;
use portfolio_workflow::portfolio::{reconcile, Installment, InstallmentState, Payment};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

pub struct ReconcileCommand {
    pub schedule: PathBuf,
    pub payments: PathBuf,
    pub as_of: NaiveDate,
    pub json: bool,
}

impl ReconcileCommand {
    pub async fn execute(&self) -> Result<()> {
        let schedule: Vec<Installment> = read_json(&self.schedule).await?;
        let payments: Vec<Payment> = read_json(&self.payments).await?;
        let summary = reconcile(&schedule, &payments, self.as_of)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }

        println!("🧾 REPAYMENT RECONCILIATION (as of {})", self.as_of);
        println!("──────────────────────────────────────");
        for report in &summary.installments {
            let symbol = match report.state {
                InstallmentState::Paid => "✅",
                InstallmentState::Partial => "🟡",
                InstallmentState::Overdue => "🔴",
                InstallmentState::Upcoming => "⬜",
            };
            let slippage = match report.slippage_days {
                Some(days) if days > 0 => format!("{days} days late"),
                Some(days) if days < 0 => format!("{} days early", -days),
                Some(_) => "on time".to_string(),
                None => String::new(),
            };
            println!(
                "{symbol} #{:<3} due {}  {:>12} / {:<12} {}",
                report.number,
                report.due_date,
                format_minor(report.amount_paid),
                format_minor(report.amount_due),
                slippage
            );
        }

        println!();
        println!("💼 SUMMARY:");
        println!("   💰 Total due: {}", format_minor(summary.total_due));
        println!("   ✅ Total paid: {}", format_minor(summary.total_paid));
        println!(
            "   ⏳ Remaining: {} ({:.1}%)",
            format_minor(summary.remaining),
            summary.remaining_percentage
        );
        if let Some(average) = summary.average_slippage_days {
            println!("   📅 Average slippage: {average:.1} days");
        }
        if summary.overpayment > 0 {
            println!("   ⚠️  Overpaid by {}", format_minor(summary.overpayment));
        }
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Minor units rendered with two decimals
fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

//! Repayment reconciliation
//!
//! Payments are applied oldest first to installments in due date order. An
//! installment is settled on the date of the payment that completes it, and
//! its slippage is the signed number of days between that date and the due
//! date (positive means late).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WorkflowError};

/// A scheduled installment, amounts in minor units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount_due: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub date: NaiveDate,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentState {
    Paid,
    Partial,
    Overdue,
    Upcoming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentReport {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub settled_on: Option<NaiveDate>,
    pub slippage_days: Option<i64>,
    pub state: InstallmentState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentSummary {
    pub installments: Vec<InstallmentReport>,
    pub total_due: i64,
    pub total_paid: i64,
    pub remaining: i64,
    /// Share of the total still owed, 0 to 100
    pub remaining_percentage: f64,
    /// Mean slippage over settled installments
    pub average_slippage_days: Option<f64>,
    /// Paid beyond the whole schedule
    pub overpayment: i64,
}

/// Reconcile a repayment schedule with the payments received up to `as_of`.
pub fn reconcile(
    schedule: &[Installment],
    payments: &[Payment],
    as_of: NaiveDate,
) -> Result<RepaymentSummary> {
    if let Some(bad) = schedule.iter().find(|i| i.amount_due < 0) {
        return Err(WorkflowError::Validation(format!(
            "installment {} has a negative amount",
            bad.number
        )));
    }
    if payments.iter().any(|p| p.amount < 0) {
        return Err(WorkflowError::Validation("payments cannot be negative".into()));
    }

    let mut installments: Vec<&Installment> = schedule.iter().collect();
    installments.sort_by_key(|i| (i.due_date, i.number));
    let mut payments: Vec<&Payment> = payments.iter().filter(|p| p.date <= as_of).collect();
    payments.sort_by_key(|p| p.date);

    let mut reports: Vec<InstallmentReport> = installments
        .iter()
        .map(|i| InstallmentReport {
            number: i.number,
            due_date: i.due_date,
            amount_due: i.amount_due,
            amount_paid: 0,
            settled_on: None,
            slippage_days: None,
            state: InstallmentState::Upcoming,
        })
        .collect();

    let mut cursor = 0;
    let mut overpayment = 0;
    for payment in payments {
        let mut left = payment.amount;
        while left > 0 {
            // Zero amount installments settle with the first payment
            let Some(report) = reports.get_mut(cursor) else {
                overpayment += left;
                break;
            };
            let outstanding = report.amount_due - report.amount_paid;
            let applied = left.min(outstanding);
            report.amount_paid += applied;
            left -= applied;
            if report.amount_paid >= report.amount_due {
                report.settled_on = Some(payment.date);
                report.slippage_days = Some((payment.date - report.due_date).num_days());
                cursor += 1;
            }
        }
    }

    for report in &mut reports {
        report.state = if report.settled_on.is_some() {
            InstallmentState::Paid
        } else if report.due_date < as_of {
            InstallmentState::Overdue
        } else if report.amount_paid > 0 {
            InstallmentState::Partial
        } else {
            InstallmentState::Upcoming
        };
    }

    let total_due: i64 = reports.iter().map(|r| r.amount_due).sum();
    let total_paid: i64 = reports.iter().map(|r| r.amount_paid).sum();
    let remaining = total_due - total_paid;
    let remaining_percentage = if total_due == 0 {
        0.0
    } else {
        (remaining as f64 / total_due as f64 * 100.0).clamp(0.0, 100.0)
    };

    let slippages: Vec<i64> = reports.iter().filter_map(|r| r.slippage_days).collect();
    let average_slippage_days = if slippages.is_empty() {
        None
    } else {
        Some(slippages.iter().sum::<i64>() as f64 / slippages.len() as f64)
    };

    Ok(RepaymentSummary {
        installments: reports,
        total_due,
        total_paid,
        remaining,
        remaining_percentage,
        average_slippage_days,
        overpayment,
    })
}

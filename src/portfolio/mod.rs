// Portfolio computations used alongside operations

pub mod currency;
pub mod repayment;

pub use currency::CurrencyConverter;
pub use repayment::{
    reconcile, Installment, InstallmentReport, InstallmentState, Payment, RepaymentSummary,
};

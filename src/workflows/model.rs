use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Product family a workflow applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Credit,
    Leasing,
    Investment,
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowType::Credit => "credit",
            WorkflowType::Leasing => "leasing",
            WorkflowType::Investment => "investment",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credit" => Ok(WorkflowType::Credit),
            "leasing" => Ok(WorkflowType::Leasing),
            "investment" => Ok(WorkflowType::Investment),
            other => Err(format!("unknown workflow type '{other}' (credit, leasing, investment)")),
        }
    }
}

/// Who acts on a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignedRole {
    Client,
    Institution,
}

/// Sub-type of a payment step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Disbursement,
    Repayment,
    Rent,
    Transfer,
}

/// Every kind of step a workflow can contain.
///
/// Adding a variant forces `label`, `is_payment` and `default_payment_kind`
/// to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Submission,
    DocumentCollection,
    KycVerification,
    ComplianceCheck,
    Validation,
    CreditAnalysis,
    RiskAssessment,
    GuaranteeEvaluation,
    CommitteeReview,
    Approval,
    Rejection,
    ContractGeneration,
    ContractSignature,
    GuaranteeRegistration,
    InsuranceSubscription,
    AssetOrdering,
    AssetDelivery,
    AssetInspection,
    Disbursement,
    Repayment,
    RentPayment,
    Transfer,
    PaymentValidation,
    InvestmentSubscription,
    ValuationReview,
    Redemption,
    LegalReview,
    ClientConfirmation,
    Notification,
    Closure,
    Archiving,
}

impl StepType {
    pub const ALL: &'static [StepType] = &[
        StepType::Submission,
        StepType::DocumentCollection,
        StepType::KycVerification,
        StepType::ComplianceCheck,
        StepType::Validation,
        StepType::CreditAnalysis,
        StepType::RiskAssessment,
        StepType::GuaranteeEvaluation,
        StepType::CommitteeReview,
        StepType::Approval,
        StepType::Rejection,
        StepType::ContractGeneration,
        StepType::ContractSignature,
        StepType::GuaranteeRegistration,
        StepType::InsuranceSubscription,
        StepType::AssetOrdering,
        StepType::AssetDelivery,
        StepType::AssetInspection,
        StepType::Disbursement,
        StepType::Repayment,
        StepType::RentPayment,
        StepType::Transfer,
        StepType::PaymentValidation,
        StepType::InvestmentSubscription,
        StepType::ValuationReview,
        StepType::Redemption,
        StepType::LegalReview,
        StepType::ClientConfirmation,
        StepType::Notification,
        StepType::Closure,
        StepType::Archiving,
    ];

    /// Human readable label
    pub fn label(self) -> &'static str {
        match self {
            StepType::Submission => "Request submission",
            StepType::DocumentCollection => "Document collection",
            StepType::KycVerification => "KYC verification",
            StepType::ComplianceCheck => "Compliance check",
            StepType::Validation => "Validation",
            StepType::CreditAnalysis => "Credit analysis",
            StepType::RiskAssessment => "Risk assessment",
            StepType::GuaranteeEvaluation => "Guarantee evaluation",
            StepType::CommitteeReview => "Committee review",
            StepType::Approval => "Approval",
            StepType::Rejection => "Rejection",
            StepType::ContractGeneration => "Contract generation",
            StepType::ContractSignature => "Contract signature",
            StepType::GuaranteeRegistration => "Guarantee registration",
            StepType::InsuranceSubscription => "Insurance subscription",
            StepType::AssetOrdering => "Asset ordering",
            StepType::AssetDelivery => "Asset delivery",
            StepType::AssetInspection => "Asset inspection",
            StepType::Disbursement => "Disbursement",
            StepType::Repayment => "Repayment",
            StepType::RentPayment => "Rent payment",
            StepType::Transfer => "Transfer",
            StepType::PaymentValidation => "Payment validation",
            StepType::InvestmentSubscription => "Investment subscription",
            StepType::ValuationReview => "Valuation review",
            StepType::Redemption => "Redemption",
            StepType::LegalReview => "Legal review",
            StepType::ClientConfirmation => "Client confirmation",
            StepType::Notification => "Notification",
            StepType::Closure => "Closure",
            StepType::Archiving => "Archiving",
        }
    }

    /// Steps that move money and therefore carry a payment configuration
    pub fn is_payment(self) -> bool {
        match self {
            StepType::Disbursement
            | StepType::Repayment
            | StepType::RentPayment
            | StepType::Transfer
            | StepType::PaymentValidation
            | StepType::Redemption => true,
            StepType::Submission
            | StepType::DocumentCollection
            | StepType::KycVerification
            | StepType::ComplianceCheck
            | StepType::Validation
            | StepType::CreditAnalysis
            | StepType::RiskAssessment
            | StepType::GuaranteeEvaluation
            | StepType::CommitteeReview
            | StepType::Approval
            | StepType::Rejection
            | StepType::ContractGeneration
            | StepType::ContractSignature
            | StepType::GuaranteeRegistration
            | StepType::InsuranceSubscription
            | StepType::AssetOrdering
            | StepType::AssetDelivery
            | StepType::AssetInspection
            | StepType::InvestmentSubscription
            | StepType::ValuationReview
            | StepType::LegalReview
            | StepType::ClientConfirmation
            | StepType::Notification
            | StepType::Closure
            | StepType::Archiving => false,
        }
    }

    /// Payment sub-type preselected when a payment step is created
    pub fn default_payment_kind(self) -> Option<PaymentKind> {
        match self {
            StepType::Disbursement => Some(PaymentKind::Disbursement),
            StepType::Repayment | StepType::Redemption => Some(PaymentKind::Repayment),
            StepType::RentPayment => Some(PaymentKind::Rent),
            StepType::Transfer | StepType::PaymentValidation => Some(PaymentKind::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    /// Accepts the snake_case wire name (`credit_analysis`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown step type '{s}'"))
    }
}

/// Attachment expected on a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSpec {
    pub required: bool,
    pub max_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub description: String,
}

impl AttachmentSpec {
    /// Check a file name and size against the attachment rules
    pub fn accepts(&self, file_name: &str, size_bytes: u64) -> bool {
        if size_bytes > self.max_size_bytes {
            return false;
        }
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let extension = match file_name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return false,
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&extension))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationCriteria {
    pub required_documents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub kind: PaymentKind,
    pub currency: String,
    pub frequency: Option<String>,
    pub grace_period_days: u32,
    pub approver_count: u32,
}

impl PaymentConfig {
    /// Single-approver configuration without a schedule or grace period
    pub fn new(kind: PaymentKind, currency: impl Into<String>) -> Self {
        Self {
            kind,
            currency: currency.into(),
            frequency: None,
            grace_period_days: 0,
            approver_count: 1,
        }
    }
}

/// A single unit of work in a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_type: StepType,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub requires_token: bool,
    #[serde(default)]
    pub generates_token: bool,
    #[serde(default)]
    pub assigned_role: Option<AssignedRole>,
    #[serde(default)]
    pub attachment: Option<AttachmentSpec>,
    #[serde(default)]
    pub validation_criteria: Option<ValidationCriteria>,
    #[serde(default)]
    pub payment: Option<PaymentConfig>,
    #[serde(default)]
    pub expected_duration_hours: Option<u32>,
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            label: step_type.label().to_string(),
            description: String::new(),
            order: 0,
            requires_token: false,
            generates_token: false,
            assigned_role: None,
            attachment: None,
            validation_criteria: None,
            payment: None,
            expected_duration_hours: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn requiring_token(mut self) -> Self {
        self.requires_token = true;
        self
    }

    pub fn generating_token(mut self) -> Self {
        self.generates_token = true;
        self
    }

    pub fn assigned_to(mut self, role: AssignedRole) -> Self {
        self.assigned_role = Some(role);
        self
    }

    /// Preselect the payment kind of a payment step, settled in `currency`.
    /// An existing configuration is left alone.
    pub fn fill_default_payment(&mut self, currency: &str) {
        if self.payment.is_none() {
            self.payment = self
                .step_type
                .default_payment_kind()
                .map(|kind| PaymentConfig::new(kind, currency));
        }
    }

    pub fn is_client_step(&self) -> bool {
        self.assigned_role == Some(AssignedRole::Client)
    }
}

/// An ordered template of steps applicable to one or more products
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub workflow_type: WorkflowType,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Cancelled)
    }
}

/// When an operation entered and left a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A live run of a workflow against a credit, leasing or investment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInstance {
    pub id: String,
    pub workflow_id: String,
    pub current_step: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub validated_tokens: BTreeSet<String>,
    #[serde(default)]
    pub step_history: Vec<StepTiming>,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationInstance {
    /// Latest timing entry recorded for a step
    pub fn timing(&self, step_id: &str) -> Option<&StepTiming> {
        self.step_history.iter().rev().find(|t| t.step_id == step_id)
    }
}

/// A token generated by a step, kept so it can be shown again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub operation_id: String,
    pub step_id: String,
    pub value: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl IssuedToken {
    pub fn vault_key(operation_id: &str, step_id: &str) -> String {
        format!("{operation_id}:{step_id}")
    }
}

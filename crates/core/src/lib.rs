pub mod audit;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod ports;
pub mod pricing;
pub mod quota;
pub mod sms;
pub mod templating;

pub use dispatch::{
    DialogDirective, DispatchError, DispatchFailure, DispatchReport, DispatchRequest, EmailIntent,
    MultiChannelDispatcher, SmsIntent, StepOutcome, StepStatus,
};
pub use domain::lead::{Lead, LeadId};
pub use domain::plan::{Plan, ResourceKind};
pub use domain::quote::{NewQuote, Quote, QuoteDraft, QuoteId, QuotePatch, ServiceLineItem, UserId};
pub use domain::status::{EntityKind, Status, StatusId};
pub use errors::{ApplicationError, DomainError, InterfaceError, ValidationError};
pub use lifecycle::{LifecycleError, QuoteCreation, QuoteLifecycle, TransitionPolicy, Unrestricted};
pub use pricing::{LivePricing, LivePreview, PricingBreakdown, PricingError};
pub use quota::{Admission, BlockReason, QuoteQuotaGuard};
pub use sms::{SmsSegmentation, SmsSegmenter};
pub use templating::{ResolutionContext, ResolvedMessage, TemplateVariableResolver};

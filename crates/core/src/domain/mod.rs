pub mod dispatch;
pub mod lead;
pub mod plan;
pub mod quote;
pub mod status;
pub mod template;
pub mod variable;

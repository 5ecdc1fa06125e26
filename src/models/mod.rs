pub mod choices;
pub mod incident;
pub mod incident_attachment;
pub mod payload;
pub mod statistics;
pub mod validation;

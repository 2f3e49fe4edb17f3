//! HTTP implementation of [`crmflow_core::CrmBackend`] for the HubSpot CRM v3 object API.

pub mod hubspot;

pub use hubspot::HubSpotClient;

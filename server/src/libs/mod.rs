pub mod api_response;
pub mod app_config;
pub mod peer_registry;
pub mod release_detector;
pub mod rmp_serializer;
pub mod service_installer;
pub mod shared_state;
pub mod snapshot_store;

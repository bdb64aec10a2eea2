pub mod mock_cloud_storage;
pub mod mock_download_client;

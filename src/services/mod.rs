pub mod classifier_service;
pub mod organize_service;
pub mod review_service;
pub mod storage_service;

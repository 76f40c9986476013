mod dependency_cascade_tests;
mod end_to_end_tests;
mod expiration_tests;
mod job_lifecycle_tests;
mod listing_tests;
mod scheduler_tests;
mod tracking_proxy_tests;

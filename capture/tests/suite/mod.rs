mod concurrent_streams;
mod eviction;
mod window_queries;

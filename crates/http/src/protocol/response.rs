use http::Response;

/// A response before its body is attached; what the header encoder writes.
pub type ResponseHead = Response<()>;

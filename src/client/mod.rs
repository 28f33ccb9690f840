pub mod compute;
pub mod metadata;

pub use compute::{
    ComputeClient, ComputeError, InstancesSetSecurityPolicyRequest, Operation, PolicyEndpoint,
    PolicyRequest, DEFAULT_COMPUTE_ENDPOINT, PRIMARY_NETWORK_INTERFACE,
};
pub use metadata::{
    MetadataClient, MetadataError, MetadataSource, StaticToken, TokenSource, METADATA_HOST_ENV,
};

#[allow(dead_code)]
#[allow(clippy::type_complexity)]
#[allow(clippy::unit_arg)]
#[allow(clippy::redundant_closure)]
#[allow(clippy::enum_variant_names)]
#[allow(clippy::upper_case_acronyms)]
pub mod mayastor {
    impl From<()> for Null {
        fn from(_: ()) -> Self {
            Self {}
        }
    }

    tonic::include_proto!("mayastor");
}

pub use mayastor::mayastor_client::MayastorClient;
pub use mayastor::mayastor_server::{Mayastor, MayastorServer};

use crate::config::SmearingParams;
use crate::error::{Error, Result};
use crate::lattice::field::Field;

/// Link-smearing seam. Concrete smearing kernels live with the gauge-field
/// collaborator; the pipeline only needs the id-dispatched construction and
/// the in-place application.
pub trait LinkSmearing {
    fn smear(&self, links: &mut [Field]);
}

struct NoSmearing;

impl LinkSmearing for NoSmearing {
    fn smear(&self, _links: &mut [Field]) {}
}

pub fn create_smearing(params: &SmearingParams) -> Result<Box<dyn LinkSmearing>> {
    match params.id.as_str() {
        "none" => Ok(Box::new(NoSmearing)),
        other => Err(Error::Config(format!("unknown link smearing `{other}`"))),
    }
}

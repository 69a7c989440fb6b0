use crate::DialogSumError;
use tch::{Kind, Scalar};

/// Smallest finite value of a floating point kind, used to mask attention scores.
pub(crate) fn get_min(kind: Kind) -> Result<Scalar, DialogSumError> {
    Ok(match kind {
        Kind::Half => Scalar::float(half::f16::MIN.into()),
        Kind::Float => Scalar::float(f32::MIN.into()),
        Kind::BFloat16 => Scalar::float(half::bf16::MIN.into()),
        Kind::Double => Scalar::float(f64::MIN),
        _ => {
            return Err(DialogSumError::ValueError(format!(
                "Type not supported: attempted to get min for {kind:?}"
            )))
        }
    })
}

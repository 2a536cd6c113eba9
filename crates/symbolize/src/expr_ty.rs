//! Mapping from MIR types to the types that store their symbolic
//! expressions.

use mir::Ty;
use smallvec::SmallVec;

/// Returns the type used to store the symbolic expression for a value of
/// type `ty`, or `None` if no expression representation exists.
///
/// Scalars collapse to a single opaque handle: for pointers in particular,
/// the expression stands for the pointer *value*, not for whatever it points
/// to. Aggregates map element-wise so that every scalar slot gets its own
/// handle.
pub fn expression_ty(ty: &Ty) -> Option<Ty> {
    if ty.is_single_value() {
        return Some(Ty::byte_ptr());
    }
    match ty {
        Ty::Array(elem, len) => Some(Ty::Array(Box::new(expression_ty(elem)?), *len)),
        Ty::Struct(fields) => {
            let mut mapped = SmallVec::<[Ty; 10]>::new();
            for field in fields {
                mapped.push(expression_ty(field)?);
            }
            Some(Ty::Struct(mapped.into_vec()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir::FloatKind;

    #[test]
    fn scalars_collapse_to_a_handle() {
        assert_eq!(expression_ty(&Ty::Int(1)), Some(Ty::byte_ptr()));
        assert_eq!(expression_ty(&Ty::Int(64)), Some(Ty::byte_ptr()));
        assert_eq!(
            expression_ty(&Ty::Struct(vec![Ty::Int(8)]).ptr_to()),
            Some(Ty::byte_ptr())
        );
        assert_eq!(expression_ty(&Ty::Float(FloatKind::F64)), Some(Ty::byte_ptr()));
    }

    #[test]
    fn aggregates_map_element_wise() {
        let ty = Ty::Struct(vec![
            Ty::Int(32),
            Ty::Array(Box::new(Ty::Int(8)), 16),
        ]);
        assert_eq!(
            expression_ty(&ty),
            Some(Ty::Struct(vec![
                Ty::byte_ptr(),
                Ty::Array(Box::new(Ty::byte_ptr()), 16),
            ]))
        );
    }

    #[test]
    fn mapping_is_stable_and_closed_under_itself() {
        let ty = Ty::Struct(vec![Ty::Int(16), Ty::Struct(vec![Ty::byte_ptr()])]);
        let once = expression_ty(&ty).unwrap();
        assert_eq!(expression_ty(&ty).unwrap(), once);
        // The image of the mapper consists of handle types, which map again.
        assert_eq!(expression_ty(&once).unwrap(), once);
    }

    #[test]
    fn unrepresentable_types_are_rejected() {
        assert_eq!(expression_ty(&Ty::Void), None);
        assert_eq!(
            expression_ty(&Ty::Func {
                params: vec![],
                ret: Box::new(Ty::Void)
            }),
            None
        );
        assert_eq!(
            expression_ty(&Ty::Array(Box::new(Ty::Void), 4)),
            None
        );
    }
}

//! Tests for the argument protocol

use super::*;
use crate::errors::{ErrorCategory, ErrorKind};
use core::ffi::c_void;
use proptest::prelude::*;

#[test]
fn test_tag_codes_round_trip() {
    for tag in ArgType::ALL {
        assert_eq!(ArgType::try_from(tag.code()), Ok(tag));
    }
    assert_eq!(ArgType::Float64.code(), 3);
    assert_eq!(ArgType::ArrayF64.code(), 5);
    assert_eq!(ArgType::Callback.code(), 7);
}

#[test]
fn test_unknown_tag_rejected() {
    assert_eq!(ArgType::try_from(0), Err(0));
    assert_eq!(ArgType::try_from(8), Err(8));
    assert_eq!(ArgType::try_from(-1), Err(-1));
}

#[test]
fn test_validate_reports_position_of_unknown_tag() {
    let mut x = 1.0f64;
    let mut bogus = 0u8;
    let mut args = ArgVector::new();
    args.push_f64(&mut x);
    unsafe {
        args.push_raw(99, &mut bogus as *mut u8 as *mut c_void);
    }

    let err = args.validate(Direction::Output).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Argument);
    assert_eq!(
        err.kind,
        ErrorKind::UnknownTag {
            position: ArgPosition::new(Direction::Output, 1),
            raw: 99
        }
    );
}

#[test]
fn test_validate_rejects_null_value() {
    let mut args = ArgVector::new();
    unsafe {
        args.push_raw(ArgType::Float64.code(), core::ptr::null_mut());
    }
    let err = args.validate(Direction::Input).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NullArgument { .. }));
}

#[test]
fn test_decode_follows_array_slot() {
    let mut dims = [3i64];
    let mut data = [1.0, 2.0, 3.0];
    let mut array = OifArrayF64::from_raw_parts(&mut dims, &mut data);
    let array_addr = &mut array as *mut OifArrayF64;
    let mut t = 0.5f64;

    let mut args = ArgVector::new();
    args.push_f64(&mut t).push_array(&mut array);

    let decoded = args.decode(Direction::Input).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].tag(), ArgType::Float64);
    match decoded[1] {
        ArgRef::ArrayF64(p) => assert_eq!(p, array_addr),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_array_slots_survive_growth() {
    let mut dims: Vec<[i64; 1]> = (0..32).map(|i| [i]).collect();
    let mut arrays: Vec<OifArrayF64> = dims
        .iter_mut()
        .map(|d| OifArrayF64::from_raw_parts(d, &mut []))
        .collect();
    let expected: Vec<*mut OifArrayF64> = arrays.iter_mut().map(|a| a as *mut _).collect();

    let mut args = ArgVector::new();
    for a in arrays.iter_mut() {
        args.push_array(a);
    }

    let decoded = args.decode(Direction::Input).unwrap();
    for (d, e) in decoded.iter().zip(&expected) {
        match d {
            ArgRef::ArrayF64(p) => assert_eq!(p, e),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_raw_view_round_trip() {
    let mut a = 1.0f64;
    let mut b = 2i32;
    let mut args = ArgVector::new();
    args.push_f64(&mut a).push_i32(&mut b);

    let raw = args.as_raw();
    let borrowed = unsafe { ArgVector::from_raw(&raw, Direction::Input) }.unwrap();
    assert_eq!(borrowed.raw_tags(), &[3, 1]);
    assert_eq!(borrowed.values(), args.values());
}

#[test]
fn test_from_raw_rejects_null_arrays() {
    let raw = OifArgs {
        num_args: 2,
        arg_types: core::ptr::null(),
        arg_values: core::ptr::null(),
    };
    let err = unsafe { ArgVector::from_raw(&raw, Direction::Input) }.unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NullArgument { .. }));

    let empty = OifArgs { num_args: 0, ..raw };
    assert!(unsafe { ArgVector::from_raw(&empty, Direction::Input) }.unwrap().is_empty());
}

#[test]
fn test_shape_rank_zero_is_scalar() {
    let mut value = [4.0];
    let array = OifArrayF64 {
        nd: 0,
        dimensions: core::ptr::null_mut(),
        data: value.as_mut_ptr(),
    };
    unsafe {
        assert_eq!(array.shape().unwrap(), Vec::<usize>::new());
        assert_eq!(array.element_count().unwrap(), 1);
        assert_eq!(array.as_slice().unwrap(), &[4.0]);
    }
}

#[test]
fn test_shape_errors() {
    let mut dims = [2i64, -1];
    let mut data = [0.0; 2];
    let array = OifArrayF64::from_raw_parts(&mut dims, &mut data);
    unsafe {
        assert_eq!(
            array.shape(),
            Err(ShapeError::NegativeDimension { axis: 1, size: -1 })
        );
    }

    let negative = OifArrayF64 { nd: -2, ..array };
    unsafe {
        assert_eq!(negative.shape(), Err(ShapeError::NegativeRank(-2)));
    }

    let mut dims = [2i64];
    let no_data = OifArrayF64 {
        nd: 1,
        dimensions: dims.as_mut_ptr(),
        data: core::ptr::null_mut(),
    };
    unsafe {
        assert_eq!(no_data.shape(), Err(ShapeError::NullData));
    }
}

#[test]
fn test_zero_length_dimension_allows_null_data() {
    let mut dims = [3i64, 0];
    let array = OifArrayF64 {
        nd: 2,
        dimensions: dims.as_mut_ptr(),
        data: core::ptr::null_mut(),
    };
    unsafe {
        assert_eq!(array.shape().unwrap(), vec![3, 0]);
        assert!(array.as_slice().unwrap().is_empty());
    }
}

#[test]
fn test_callback_constructors() {
    let native = OifCallback::from_native(0x10 as *mut c_void);
    assert_eq!(native.origin(), Some(Lang::C));
    assert!(!native.has_runtime_value());

    let runtime = OifCallback::from_runtime(Lang::Python, 0x20 as *mut c_void);
    assert_eq!(runtime.origin(), Some(Lang::Python));
    assert!(runtime.native_fn.is_null());

    let unknown = OifCallback { origin: 42, ..native };
    assert_eq!(unknown.origin(), None);
}

proptest! {
    #[test]
    fn prop_element_count_matches_product(shape in prop::collection::vec(0usize..6, 0..4)) {
        let mut dims: Vec<i64> = shape.iter().map(|&n| n as i64).collect();
        let count: usize = shape.iter().product();
        let mut data = vec![0.0; count];
        let array = OifArrayF64::from_raw_parts(&mut dims, &mut data);
        let got = unsafe { array.element_count() }.unwrap();
        prop_assert_eq!(got, count);
    }
}

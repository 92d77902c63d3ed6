//! Python bridge tests against the modules under `tests/fixtures`
//!
//! One interpreter per process: every test shares the same bridge.

use core::ffi::c_void;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use oif_dispatch::{
    ArgVector, Backend, BackendKind, DispatchConfig, EmbeddedBridge, ErrorCategory, ErrorKind,
    ImplDetails, ImplHandle, Lang, OifArrayF64, OifCallback, PythonRuntime, Version,
};

static BRIDGE: Lazy<EmbeddedBridge<PythonRuntime>> = Lazy::new(|| {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures");
    let config = DispatchConfig::default().with_impl_root(root);
    EmbeddedBridge::new(PythonRuntime::acquire().unwrap(), config)
});

fn load(details: &str) -> ImplHandle {
    let details = ImplDetails::parse(details).unwrap();
    BRIDGE.load_module(&details, Version::new(1, 0)).unwrap()
}

fn qeq() -> ImplHandle {
    load("qeq/py_qeq/qeq.py qeq.py_qeq")
}

extern "C" fn decay(_t: f64, y: *mut OifArrayF64, ydot: *mut OifArrayF64, _user_data: *mut c_void) -> i32 {
    unsafe {
        let n = (*y).element_count().unwrap();
        for i in 0..n {
            *(*ydot).data.add(i) = -*(*y).data.add(i);
        }
    }
    0
}

#[test]
fn test_solve_qeq() {
    let handle = qeq();
    assert_eq!(handle.kind, BackendKind::Embedded(Lang::Python));

    let (mut a, mut b, mut c) = (1.0, 5.0, 4.0);
    let mut dims = [2i64];
    let mut roots = [0.0; 2];
    let mut array = OifArrayF64::from_raw_parts(&mut dims, &mut roots);
    let mut inputs = ArgVector::new();
    inputs.push_f64(&mut a).push_f64(&mut b).push_f64(&mut c);
    let mut outputs = ArgVector::new();
    outputs.push_array(&mut array);

    let status = BRIDGE.call_impl(handle, "solve_qeq", &inputs, &outputs).unwrap();
    drop(outputs);
    assert_eq!(status, 0);
    roots.sort_by(|x, y| x.partial_cmp(y).unwrap());
    assert!((roots[0] + 4.0).abs() < 1e-12 && (roots[1] + 1.0).abs() < 1e-12, "{:?}", roots);

    let calls = BRIDGE
        .call_impl(handle, "call_count", &ArgVector::new(), &ArgVector::new())
        .unwrap();
    assert_eq!(calls, 1);
    BRIDGE.unload_impl(handle).unwrap();
}

#[test]
fn test_return_and_exception_policy() {
    let handle = qeq();
    let none = ArgVector::new();

    let err = BRIDGE.call_impl(handle, "describe", &none, &none).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::UnsupportedReturn {
            method: "describe".into(),
            found: "str".into()
        }
    );

    let err = BRIDGE.call_impl(handle, "fail", &none, &none).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::RuntimeCall);
    assert!(err.to_string().contains("ValueError: solver refused the input"));

    let err = BRIDGE.call_impl(handle, "integrate", &none, &none).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::MissingMethod { .. }));

    BRIDGE.unload_impl(handle).unwrap();
    assert!(BRIDGE.unload_impl(handle).is_err());
}

#[test]
fn test_missing_module() {
    let details = ImplDetails::parse("qeq/absent.py qeq.absent").unwrap();
    let err = BRIDGE.load_module(&details, Version::new(1, 0)).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Resolution);
}

#[test]
fn test_module_function_writes_through_view() {
    let handle = load("ivp/py_euler/euler.py ivp.py_euler");

    for shape in [vec![], vec![0], vec![3], vec![2, 3]] {
        let count: usize = shape.iter().product();
        let mut data: Vec<f64> = (0..count).map(|i| i as f64 + 0.5).collect();
        let mut scalar = [0.5];
        let mut dims: Vec<i64> = shape.iter().map(|&n| n as i64).collect();
        let mut array = if shape.is_empty() {
            OifArrayF64::from_raw_parts(&mut dims, &mut scalar)
        } else {
            OifArrayF64::from_raw_parts(&mut dims, &mut data)
        };

        let mut factor = 2.0;
        let mut inputs = ArgVector::new();
        inputs.push_f64(&mut factor);
        let mut outputs = ArgVector::new();
        outputs.push_array(&mut array);

        assert_eq!(BRIDGE.call_impl(handle, "scale", &inputs, &outputs).unwrap(), 0);
        drop(outputs);

        if shape.is_empty() {
            assert_eq!(scalar, [1.0]);
        } else {
            let expected: Vec<f64> = (0..count).map(|i| 2.0 * (i as f64 + 0.5)).collect();
            assert_eq!(data, expected, "shape {:?}", shape);
        }
    }
    BRIDGE.unload_impl(handle).unwrap();
}

#[test]
fn test_native_callback_drives_integration() {
    let handle = load("ivp/py_euler/euler.py ivp.py_euler");
    let built_before = BRIDGE.callback_wrappers_built();

    let mut y0 = [1.0];
    let mut dims = [1i64];
    let mut y0_array = OifArrayF64::from_raw_parts(&mut dims, &mut y0);
    let mut t0 = 0.0;
    let mut inputs = ArgVector::new();
    inputs.push_array(&mut y0_array).push_f64(&mut t0);
    BRIDGE
        .call_impl(handle, "set_initial_value", &inputs, &ArgVector::new())
        .unwrap();

    let mut rhs = OifCallback::from_native(decay as *mut c_void);
    for _ in 0..2 {
        let mut inputs = ArgVector::new();
        inputs.push_callback(&mut rhs);
        BRIDGE.call_impl(handle, "set_rhs_fn", &inputs, &ArgVector::new()).unwrap();
    }
    assert_eq!(BRIDGE.callback_wrappers_built(), built_before + 1);

    let mut t = 1.0;
    let mut y = [0.0];
    let mut y_dims = [1i64];
    let mut y_array = OifArrayF64::from_raw_parts(&mut y_dims, &mut y);
    let mut inputs = ArgVector::new();
    inputs.push_f64(&mut t);
    let mut outputs = ArgVector::new();
    outputs.push_array(&mut y_array);

    let status = BRIDGE.call_impl(handle, "integrate", &inputs, &outputs).unwrap();
    drop(outputs);
    assert_eq!(status, 0);
    // Explicit Euler with h = 0.01 on y' = -y gives 0.99^100.
    assert!((y[0] - 0.99f64.powi(100)).abs() < 1e-9, "y = {}", y[0]);

    BRIDGE.unload_impl(handle).unwrap();
}

#[test]
fn test_second_runtime_is_refused() {
    Lazy::force(&BRIDGE);
    let err = PythonRuntime::acquire().err().unwrap();
    assert!(err.is_fatal());
}

//! Backend parity tests for MultiMarginLossOps.

use super::helpers::*;
use marginr::{DType, MultiMarginLossOps, Reduction, Runtime, Tensor};

struct Case {
    shape: &'static [usize],
    p: i64,
    margin: f64,
    weighted: bool,
    reduction: Reduction,
}

const CASES: &[Case] = &[
    Case {
        shape: &[4, 5],
        p: 1,
        margin: 1.0,
        weighted: false,
        reduction: Reduction::None,
    },
    Case {
        shape: &[4, 5],
        p: 2,
        margin: 0.5,
        weighted: true,
        reduction: Reduction::Mean,
    },
    Case {
        shape: &[3, 300],
        p: 1,
        margin: 1.0,
        weighted: true,
        reduction: Reduction::Sum,
    },
    Case {
        shape: &[3, 300],
        p: 2,
        margin: 2.0,
        weighted: false,
        reduction: Reduction::None,
    },
    Case {
        shape: &[7],
        p: 1,
        margin: 1.0,
        weighted: false,
        reduction: Reduction::Mean,
    },
];

fn nframe_dim(shape: &[usize]) -> (usize, usize) {
    match shape {
        [d] => (1, *d),
        [n, d] => (*n, *d),
        _ => unreachable!("parity cases are rank 1 or 2"),
    }
}

/// Run forward and backward for one case on any backend, returning host copies.
fn run_case<R>(client: &R::Client, device: &R::Device, case: &Case) -> (Vec<f32>, Vec<f32>)
where
    R: Runtime<DType = DType>,
    R::Client: MultiMarginLossOps<R>,
{
    let (n, d) = nframe_dim(case.shape);
    let input = Tensor::<R>::from_slice(&det_data(n * d), case.shape, device);
    let target = Tensor::<R>::from_slice(&det_targets(n, d), &[n], device);
    let weight_data: Vec<f32> = (0..d).map(|i| 0.5 + (i % 3) as f32 * 0.25).collect();
    let weight = Tensor::<R>::from_slice(&weight_data, &[d], device);
    let weight = case.weighted.then_some(&weight);

    let out = client
        .multi_margin_loss_fwd(&input, &target, case.p, case.margin, weight, case.reduction)
        .unwrap();

    let grad_output = if case.reduction == Reduction::None {
        let g: Vec<f32> = (0..n).map(|i| 1.0 - 0.25 * i as f32).collect();
        Tensor::<R>::from_slice(&g, &[n], device)
    } else {
        Tensor::<R>::from_slice(&[1.5f32], &[], device)
    };
    let grad = client
        .multi_margin_loss_bwd(
            &grad_output,
            &input,
            &target,
            case.p,
            case.margin,
            weight,
            case.reduction,
        )
        .unwrap();
    assert_eq!(grad.shape(), case.shape);

    (out.to_vec::<f32>(), grad.to_vec::<f32>())
}

#[test]
fn test_multi_margin_parity() {
    let (cpu_client, cpu_device) = setup_cpu();
    let cpu_results: Vec<(Vec<f32>, Vec<f32>)> = CASES
        .iter()
        .map(|case| run_case::<numr::runtime::cpu::CpuRuntime>(&cpu_client, &cpu_device, case))
        .collect();

    // CPU sanity: every reference row's gradient is finite
    for (fwd, bwd) in &cpu_results {
        assert!(fwd.iter().chain(bwd.iter()).all(|v| v.is_finite()));
    }

    #[cfg(feature = "cuda")]
    with_cuda_backend(|cuda_client, cuda_device| {
        for (case, (cpu_fwd, cpu_bwd)) in CASES.iter().zip(&cpu_results) {
            let (fwd, bwd) = run_case::<numr::runtime::cuda::CudaRuntime>(
                &cuda_client,
                &cuda_device,
                case,
            );
            let label = format!("{:?} p={} {}", case.shape, case.p, case.reduction);
            assert_parity_f32(&fwd, cpu_fwd, &format!("multi_margin fwd CUDA vs CPU {label}"));
            assert_parity_f32(&bwd, cpu_bwd, &format!("multi_margin bwd CUDA vs CPU {label}"));
        }
    });

    #[cfg(feature = "wgpu")]
    with_wgpu_backend(|wgpu_client, wgpu_device| {
        for (case, (cpu_fwd, cpu_bwd)) in CASES.iter().zip(&cpu_results) {
            let (fwd, bwd) = run_case::<numr::runtime::wgpu::WgpuRuntime>(
                &wgpu_client,
                &wgpu_device,
                case,
            );
            let label = format!("{:?} p={} {}", case.shape, case.p, case.reduction);
            assert_parity_f32(&fwd, cpu_fwd, &format!("multi_margin fwd WGPU vs CPU {label}"));
            assert_parity_f32(&bwd, cpu_bwd, &format!("multi_margin bwd WGPU vs CPU {label}"));
        }
    });
}

#[cfg(feature = "cuda")]
#[test]
fn test_multi_margin_half_parity_cuda() {
    use numr::runtime::cpu::CpuRuntime;
    use numr::runtime::cuda::CudaRuntime;

    let (cpu_client, cpu_device) = setup_cpu();
    let (n, d) = (6, 140);
    let data: Vec<half::f16> = det_data(n * d)
        .into_iter()
        .map(half::f16::from_f32)
        .collect();
    let targets = det_targets(n, d);

    let cpu_out = {
        let input = Tensor::<CpuRuntime>::from_slice(&data, &[n, d], &cpu_device);
        let target = Tensor::<CpuRuntime>::from_slice(&targets, &[n], &cpu_device);
        cpu_client
            .multi_margin_loss_fwd(&input, &target, 2, 1.0, None, Reduction::None)
            .unwrap()
            .to_vec::<half::f16>()
    };

    with_cuda_backend(|cuda_client, cuda_device| {
        let input = Tensor::<CudaRuntime>::from_slice(&data, &[n, d], &cuda_device);
        let target = Tensor::<CudaRuntime>::from_slice(&targets, &[n], &cuda_device);
        let out = cuda_client
            .multi_margin_loss_fwd(&input, &target, 2, 1.0, None, Reduction::None)
            .unwrap()
            .to_vec::<half::f16>();
        let a: Vec<f32> = out.iter().map(|v| v.to_f32()).collect();
        let b: Vec<f32> = cpu_out.iter().map(|v| v.to_f32()).collect();
        assert_parity_f32_tol(&a, &b, "multi_margin fwd f16 CUDA vs CPU", 1e-3, 1e-3);
    });
}

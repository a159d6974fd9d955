//! Matrix multiply for the interpreter device

use parking_lot::RwLock;
use rayon::prelude::*;

use super::kernel::{from_f64, to_f64};
use super::memory::MemoryManager;
use crate::error::{BackendError, Result};
use crate::executor::GemmConfig;
use crate::isa::Type;
use crate::memory::DeviceMemoryBase;

fn decode(ty: Type, bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(ty.size_bytes())
        .map(|chunk| {
            let bits = match chunk.len() {
                2 => u16::from_le(bytemuck::pod_read_unaligned::<u16>(chunk)) as u64,
                4 => u32::from_le(bytemuck::pod_read_unaligned::<u32>(chunk)) as u64,
                _ => u64::from_le(bytemuck::pod_read_unaligned::<u64>(chunk)),
            };
            to_f64(ty, bits)
        })
        .collect()
}

fn check_size(buffer: DeviceMemoryBase, expected: usize) -> Result<DeviceMemoryBase> {
    if buffer.size() < expected {
        return Err(BackendError::SizeMismatch {
            expected,
            actual: buffer.size(),
        });
    }
    buffer.slice(0, expected)
}

/// `out = alpha * op(lhs) * op(rhs) + beta * out`, accumulated in f64.
///
/// With `beta == 0` the previous contents of `out` are not read.
pub(crate) fn gemm(
    memory: &RwLock<MemoryManager>,
    config: &GemmConfig,
    lhs: DeviceMemoryBase,
    rhs: DeviceMemoryBase,
    out: DeviceMemoryBase,
) -> Result<()> {
    if !config.element.is_float() {
        return Err(BackendError::unsupported(format!("gemm on {}", config.element)));
    }
    let lhs = check_size(lhs, config.lhs_bytes())?;
    let rhs = check_size(rhs, config.rhs_bytes())?;
    let out = check_size(out, config.output_bytes())?;

    let ty = config.element;
    let (a, b, previous) = {
        let guard = memory.read();
        let previous = if config.beta != 0.0 {
            decode(ty, guard.bytes(out)?)
        } else {
            vec![0.0; config.m * config.n]
        };
        (decode(ty, guard.bytes(lhs)?), decode(ty, guard.bytes(rhs)?), previous)
    };

    let (m, n, k) = (config.m, config.n, config.k);
    let lhs_at = |i: usize, l: usize| {
        if config.lhs_transposed {
            a[l * m + i]
        } else {
            a[i * k + l]
        }
    };
    let rhs_at = |l: usize, j: usize| {
        if config.rhs_transposed {
            b[j * k + l]
        } else {
            b[l * n + j]
        }
    };

    let mut result = previous;
    if n > 0 {
        result.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for (j, cell) in row.iter_mut().enumerate() {
                let dot: f64 = (0..k).map(|l| lhs_at(i, l) * rhs_at(l, j)).sum();
                *cell = config.alpha * dot + config.beta * *cell;
            }
        });
    }

    let width = ty.size_bytes();
    let mut guard = memory.write();
    let bytes = guard.bytes_mut(out)?;
    for (cell, value) in bytes.chunks_exact_mut(width).zip(result) {
        cell.copy_from_slice(&from_f64(ty, value, false).to_le_bytes()[..width]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(memory: &RwLock<MemoryManager>, values: &[f32]) -> DeviceMemoryBase {
        let mut guard = memory.write();
        let buffer = guard.allocate(values.len() * 4).unwrap();
        guard
            .bytes_mut(buffer)
            .unwrap()
            .copy_from_slice(bytemuck::cast_slice(values));
        buffer
    }

    fn download(memory: &RwLock<MemoryManager>, buffer: DeviceMemoryBase) -> Vec<f32> {
        let guard = memory.read();
        guard
            .bytes(buffer)
            .unwrap()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect()
    }

    fn config(m: usize, n: usize, k: usize) -> GemmConfig {
        GemmConfig {
            element: Type::F32,
            m,
            n,
            k,
            alpha: 1.0,
            beta: 0.0,
            lhs_transposed: false,
            rhs_transposed: false,
        }
    }

    #[test]
    fn test_gemm_2x2() {
        let memory = RwLock::new(MemoryManager::new(1 << 20));
        let lhs = upload(&memory, &[1.0, 2.0, 3.0, 4.0]);
        let rhs = upload(&memory, &[5.0, 6.0, 7.0, 8.0]);
        let out = upload(&memory, &[f32::NAN; 4]);
        gemm(&memory, &config(2, 2, 2), lhs, rhs, out).unwrap();
        assert_eq!(download(&memory, out), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_gemm_transposed_with_beta() {
        let memory = RwLock::new(MemoryManager::new(1 << 20));
        // lhs^T stored column-major: [[1, 2], [3, 4]] is stored as [1, 3, 2, 4].
        let lhs = upload(&memory, &[1.0, 3.0, 2.0, 4.0]);
        let rhs = upload(&memory, &[1.0, 0.0, 0.0, 1.0]);
        let out = upload(&memory, &[1.0, 1.0, 1.0, 1.0]);
        let config = GemmConfig {
            alpha: 2.0,
            beta: 1.0,
            lhs_transposed: true,
            ..config(2, 2, 2)
        };
        gemm(&memory, &config, lhs, rhs, out).unwrap();
        assert_eq!(download(&memory, out), vec![3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_gemm_rejects_short_buffers_and_integers() {
        let memory = RwLock::new(MemoryManager::new(1 << 20));
        let small = upload(&memory, &[1.0]);
        assert!(matches!(
            gemm(&memory, &config(2, 2, 2), small, small, small),
            Err(BackendError::SizeMismatch { .. })
        ));
        let int_config = GemmConfig {
            element: Type::I32,
            ..config(1, 1, 1)
        };
        assert!(gemm(&memory, &int_config, small, small, small).is_err());
    }
}

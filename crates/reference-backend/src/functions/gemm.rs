// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication kernels.

/// `c = a @ b` for row-major `a: [m, k]`, `b: [k, n]`, `c: [m, n]`.
///
/// Uses an ikj loop order so the inner loop is a saxpy over a row of `c`,
/// which is sequential in memory.
pub(crate) fn gemm(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    c.iter_mut().for_each(|x| *x = 0.0);
    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            let b_row = &b[p * n..(p + 1) * n];
            for (c_ij, b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
}

/// Like [`gemm`], with `b` stored as little-endian f32 bytes.
///
/// Each row of `b` is decoded once; the loop order is pik.
pub(crate) fn gemm_le_bytes(a: &[f32], b: &[u8], c: &mut [f32], m: usize, k: usize, n: usize) {
    c.iter_mut().for_each(|x| *x = 0.0);
    let mut b_row = vec![0.0f32; n];
    for p in 0..k {
        decode_le(&b[p * n * 4..(p + 1) * n * 4], &mut b_row);
        for i in 0..m {
            let a_ip = a[i * k + p];
            for (c_ij, b_pj) in c[i * n..(i + 1) * n].iter_mut().zip(&b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
}

pub(crate) fn decode_le(bytes: &[u8], out: &mut [f32]) {
    for (v, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

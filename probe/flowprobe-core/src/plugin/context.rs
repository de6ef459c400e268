// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Helpers for plugins to construct and access their typed context
//! inside the raw region the flow allocation reserves for them.

use core::mem::{align_of, size_of};

#[inline]
fn check_region<C>(data: &[u8]) {
    assert!(
        size_of::<C>() <= data.len(),
        "context region too small for context type"
    );
    assert_eq!(
        data.as_ptr() as usize % align_of::<C>(),
        0,
        "context region misaligned for context type"
    );
}

/// Moves `value` into the context region and returns a typed reference.
///
/// Must be the first write to the region; the previous contents (zeroed
/// bytes) are not dropped.
#[inline]
pub fn write_context<C>(data: &mut [u8], value: C) -> &mut C {
    check_region::<C>(data);
    unsafe {
        let ptr = data.as_mut_ptr() as *mut C;
        ptr.write(value);
        &mut *ptr
    }
}

/// Reinterprets the context region as a constructed `C`.
///
/// # Safety
///
/// The region must hold a value previously placed by [`write_context`]
/// with the same `C`, not yet dropped.
#[inline]
pub unsafe fn context_ref<C>(data: &[u8]) -> &C {
    check_region::<C>(data);
    &*(data.as_ptr() as *const C)
}

/// Mutable variant of [`context_ref`].
///
/// # Safety
///
/// Same contract as [`context_ref`].
#[inline]
pub unsafe fn context_mut<C>(data: &mut [u8]) -> &mut C {
    check_region::<C>(data);
    &mut *(data.as_mut_ptr() as *mut C)
}

/// Drops the context value in place.
///
/// # Safety
///
/// The region must hold a constructed `C`; afterwards the region must
/// not be accessed as `C` again.
#[inline]
pub unsafe fn drop_context<C>(data: &mut [u8]) {
    check_region::<C>(data);
    core::ptr::drop_in_place(data.as_mut_ptr() as *mut C);
}

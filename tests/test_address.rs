use cds_archive::util::Address;

#[test]
fn test_align_up() {
    let addr = Address::ZERO;
    let aligned = addr.align_up(8);

    assert_eq!(addr, aligned);

    let addr = unsafe { Address::from_usize(0x1001) };
    assert_eq!(addr.align_up(4096).as_usize(), 0x2000);
}

#[test]
fn test_is_aligned() {
    let addr = Address::ZERO;
    assert!(addr.is_aligned_to(8));

    let addr = unsafe { Address::from_usize(8) };
    assert!(addr.is_aligned_to(8));
    assert!(!addr.is_aligned_to(16));
}

#[test]
fn test_offsets_between_bases() {
    let requested = unsafe { Address::from_usize(0x8_0000_0000) };
    let mapped = unsafe { Address::from_usize(0x7_0000_0000) };
    assert_eq!(mapped.get_offset(requested), -0x1_0000_0000);
    assert_eq!(requested.get_offset(mapped), 0x1_0000_0000);
    assert_eq!(requested.get_extent(mapped), 0x1_0000_0000);
}

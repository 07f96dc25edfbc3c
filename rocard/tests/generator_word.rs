//! The data-generator control word survives an encode/decode cycle for
//! every legal (pattern, size, random) combination.

use rocard::cru::{decode_generator_control, regs, CruBar};
use rocard::GeneratorPattern;
use rocard_mmio::BarRegion;

#[test]
fn control_word_roundtrips_for_all_legal_settings() {
    let bar = CruBar::new(BarRegion::anonymous(0x1000, 0));
    let patterns = [
        GeneratorPattern::Incremental,
        GeneratorPattern::Alternating,
        GeneratorPattern::Constant,
    ];
    for pattern in patterns {
        for size in (32usize..=8192).step_by(32) {
            for random in [false, true] {
                bar.set_data_generator_pattern(pattern, size, random)
                    .unwrap();
                let word = bar.region().read32(regs::DATA_GENERATOR_CONTROL).unwrap();
                assert_eq!(
                    decode_generator_control(word).unwrap(),
                    (pattern, size, random),
                    "pattern {pattern} size {size} random {random}"
                );
            }
        }
    }
}

#[test]
fn illegal_sizes_never_touch_the_register() {
    let bar = CruBar::new(BarRegion::anonymous(0x1000, 0));
    bar.set_data_generator_pattern(GeneratorPattern::Incremental, 64, false)
        .unwrap();
    let before = bar.region().read32(regs::DATA_GENERATOR_CONTROL).unwrap();

    for size in [0usize, 16, 33, 8193] {
        assert!(bar
            .set_data_generator_pattern(GeneratorPattern::Incremental, size, false)
            .is_err());
    }
    assert_eq!(
        bar.region().read32(regs::DATA_GENERATOR_CONTROL).unwrap(),
        before
    );
}

//! End-to-end exercise of the factory and the uniform channel contract,
//! using the dummy card so no hardware is needed.

use rocard::{
    CardId, CardType, ChannelFactory, Error, Parameters, SerialId, Superpage,
};

fn dummy_params() -> Parameters {
    Parameters::for_channel(
        CardId::Serial(SerialId::new(ChannelFactory::dummy_serial(), 0)),
        0,
    )
}

#[test]
fn factory_assembles_a_dummy_channel() {
    let channel = ChannelFactory.obtain_channel(&dummy_params()).unwrap();
    assert_eq!(channel.card_type(), CardType::Dummy);
    assert_eq!(channel.serial().unwrap(), Some(-1));
    assert_eq!(channel.temperature().unwrap(), None);
}

#[test]
fn loopback_roundtrip_marks_superpages_ready() {
    let mut channel = ChannelFactory.obtain_channel(&dummy_params()).unwrap();
    channel.start_dma().unwrap();

    const SP: usize = 32 * 1024;
    for i in 0..8 {
        channel
            .push_superpage(Superpage::with_user_data(i * SP, SP, i as u64))
            .unwrap();
    }
    channel.fill_superpages().unwrap();
    assert_eq!(channel.ready_queue_size(), 8);

    for i in 0..8 {
        let peeked = channel.get_superpage().unwrap();
        let popped = channel.pop_superpage().unwrap();
        assert_eq!(peeked, popped);
        assert_eq!(popped.offset, i * SP);
        assert!(popped.ready);
        assert_eq!(popped.received, popped.size);
        assert_eq!(popped.user_data, Some(i as u64));
    }
    assert!(matches!(channel.pop_superpage(), Err(Error::ReadyQueueEmpty)));

    channel.stop_dma().unwrap();
    // A stopped channel can be restarted.
    channel.start_dma().unwrap();
}

#[test]
fn queue_accounting_is_conserved() {
    let mut channel = ChannelFactory.obtain_channel(&dummy_params()).unwrap();
    channel.start_dma().unwrap();
    let total = channel.transfer_queue_available();

    for i in 0..5 {
        channel
            .push_superpage(Superpage::new(i * 4096, 4096))
            .unwrap();
    }
    assert_eq!(channel.transfer_queue_available(), total - 5);
    channel.fill_superpages().unwrap();
    assert_eq!(channel.transfer_queue_available(), total);
    assert_eq!(channel.ready_queue_size(), 5);
}

#[test]
fn missing_card_id_is_a_config_error() {
    let params = Parameters::new().set_channel_number(0);
    assert!(ChannelFactory.obtain_channel(&params).is_err());
}

mod test_scenarios {
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use resched::core::aggregate::ScheduleColumn;
    use resched::core::calibration::{CalibrationResources, EventEndUse};
    use resched::core::markov::OccupantState;
    use resched::input::{ScheduleConfig, ScheduleInput};
    use resched::output::{FileOutput, MemoryOutput};
    use resched::{
        generate_schedules, run_schedule_generation, ScheduleError, ScheduleFlags,
    };
    use rstest::*;
    use serde_json::json;
    use std::fs;
    use std::io::Cursor;
    use strum::IntoEnumIterator;

    #[fixture]
    fn resources() -> &'static CalibrationResources {
        CalibrationResources::bundled().unwrap()
    }

    fn config(value: serde_json::Value) -> ScheduleConfig {
        serde_json::from_value::<ScheduleInput>(value)
            .unwrap()
            .resolve(None)
            .unwrap()
    }

    #[rstest]
    fn fixed_seed_should_give_byte_identical_files(resources: &CalibrationResources) {
        let input = r#"{"number_of_occupants": 2, "random_seed": 1234, "timestep_minutes": 30,
                        "setpoints": {"heating_setpoint": 68, "cooling_setpoint": 78,
                                      "heating_night_offset": 4, "cooling_unoccupied_offset": 3}}"#;
        let directory = tempfile::tempdir().unwrap();
        let run = |name: &str| {
            let output =
                FileOutput::new(directory.path().to_path_buf(), format!("{name}__{{}}.csv"));
            run_schedule_generation(
                Cursor::new(input),
                None,
                resources,
                &output,
                ScheduleFlags::EVENT_LOG,
            )
            .unwrap()
        };
        let first = run("first");
        let second = run("second");

        let read = |path: &Option<std::path::PathBuf>| fs::read(path.as_ref().unwrap()).unwrap();
        assert!(read(&first.schedules_path) == read(&second.schedules_path));
        assert!(read(&first.event_log_path) == read(&second.event_log_path));
        assert_eq!(first.random_seed, 1234);
    }

    #[rstest]
    fn empty_home_should_only_have_ungated_loads(resources: &CalibrationResources) {
        let config = config(json!({
            "simulation_year": 2007, "timestep_minutes": 60, "number_of_occupants": 0
        }));
        let generated = generate_schedules(&config, resources, ScheduleFlags::empty()).unwrap();

        assert!(generated.events.values().all(Vec::is_empty));
        for column in ScheduleColumn::iter() {
            let values = generated.schedules.column(&column.to_string()).unwrap();
            assert_eq!(values.len(), 8760);
            let peak = values.iter().copied().fold(0., f64::max);
            if column.is_occupancy_gated() {
                assert_eq!(peak, 0., "{column}");
            } else {
                assert_relative_eq!(peak, 1.);
            }
        }
    }

    #[rstest]
    fn three_occupants_in_colorado(resources: &CalibrationResources) {
        let input = r#"{"number_of_occupants": 3, "random_seed": 42,
                        "timestep_minutes": 15, "state_code": "CO"}"#;
        let output = MemoryOutput::default();
        let result = run_schedule_generation(
            Cursor::new(input),
            None,
            resources,
            &output,
            ScheduleFlags::empty(),
        )
        .unwrap();

        assert_eq!(result.rows, 35_040);
        let csv = output.contents("schedules").unwrap();
        assert_eq!(csv.lines().count(), 35_041);
        assert!(csv.starts_with(
            "occupants,lighting_interior,lighting_exterior,cooking_range,plug_loads_other,\
             plug_loads_tv,dishwasher,clothes_washer,clothes_dryer,hot_water_dishwasher,\
             hot_water_clothes_washer,hot_water_fixtures\n"
        ));

        let washes = result.event_counts[&EventEndUse::ClothesWasher] as f64;
        assert!((224. ..=336.).contains(&washes), "{washes} washes");
    }

    #[rstest]
    fn vacancy_over_new_year_should_empty_the_home(resources: &CalibrationResources) {
        let config = config(json!({
            "number_of_occupants": 2, "random_seed": 5, "timestep_minutes": 60,
            "vacancy_period": "Dec 15 - Jan 15"
        }));
        let generated = generate_schedules(&config, resources, ScheduleFlags::empty()).unwrap();
        let occupancy = generated.occupancy.unwrap();

        // Jan 1-15 are days 0-14, Dec 15-31 are days 348-364
        let vacant = |day: usize| day < 15 || day >= 348;
        for occupant in 0..2 {
            for (step, state) in occupancy.occupant_states(occupant).iter().enumerate() {
                if vacant(step / 96) {
                    assert_eq!(*state, OccupantState::Away);
                }
            }
        }
        for (end_use, events) in &generated.events {
            assert!(
                events.iter().all(|event| !vacant(event.day())),
                "{end_use} starts during the vacancy"
            );
        }

        let occupants = generated.schedules.column("occupants").unwrap();
        assert!(occupants[..15 * 24].iter().all(|value| *value == 0.));
        assert!(occupants[348 * 24..].iter().all(|value| *value == 0.));
    }

    #[rstest]
    fn smooth_night_setback(resources: &CalibrationResources) {
        let config = config(json!({
            "number_of_occupants": 2, "timestep_minutes": 60, "schedules_type": "smooth",
            "setpoints": {"heating_setpoint": 68, "cooling_setpoint": 78, "heating_night_offset": 5}
        }));
        let generated = generate_schedules(&config, resources, ScheduleFlags::empty()).unwrap();
        let heating = generated.schedules.column("heating_setpoint").unwrap();
        let cooling = generated.schedules.column("cooling_setpoint").unwrap();

        for (step, value) in heating.iter().enumerate() {
            let hour = step % 24;
            let expected = if hour >= 22 || hour < 7 { 63. } else { 68. };
            assert_eq!(*value, expected, "hour {hour}");
        }
        assert!(cooling.iter().all(|value| *value == 78.));
        assert_eq!(generated.setpoint_conflicts, 0);
    }

    #[rstest]
    #[case(2024, 60, 8784)]
    #[case(2007, 60, 8760)]
    #[case(2024, 10, 52_704)]
    fn row_count_should_follow_calendar(
        resources: &CalibrationResources,
        #[case] year: i32,
        #[case] timestep: u32,
        #[case] rows: usize,
    ) {
        let config = config(json!({
            "simulation_year": year, "timestep_minutes": timestep, "number_of_occupants": 1,
            "schedules_type": "smooth"
        }));
        let generated = generate_schedules(&config, resources, ScheduleFlags::empty()).unwrap();
        for (name, values) in generated.schedules.columns() {
            assert_eq!(values.len(), rows, "{name}");
        }
    }

    #[rstest]
    fn invalid_input_should_fail_before_writing(resources: &CalibrationResources) {
        let output = MemoryOutput::default();
        let result = run_schedule_generation(
            Cursor::new(r#"{"number_of_occupants": 2, "timestep_minutes": 7}"#),
            None,
            resources,
            &output,
            ScheduleFlags::empty(),
        );
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
        assert!(output.location_keys().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(4))]

        #[test]
        fn fractions_and_setpoints_stay_in_range(
            occupants in 0usize..6,
            seed in any::<u64>(),
            timestep in prop::sample::select(vec![15u32, 20, 60]),
        ) {
            let config = config(json!({
                "number_of_occupants": occupants, "random_seed": seed,
                "timestep_minutes": timestep,
                "setpoints": {"heating_setpoint": 72, "cooling_setpoint": 70,
                              "heating_night_offset": 3, "cooling_unoccupied_offset": 4}
            }));
            let generated = generate_schedules(
                &config,
                CalibrationResources::bundled().unwrap(),
                ScheduleFlags::DEBUG_COLUMNS,
            )
            .unwrap();

            for (name, values) in generated.schedules.columns() {
                if name.ends_with("setpoint") || name.ends_with("offset") {
                    continue;
                }
                prop_assert!(
                    values.iter().all(|value| (0. ..=1.0 + 1e-9).contains(value)),
                    "{} out of range", name
                );
            }

            let heating = generated.schedules.column("heating_setpoint").unwrap();
            let cooling = generated.schedules.column("cooling_setpoint").unwrap();
            for (heating, cooling) in heating.iter().zip(cooling) {
                prop_assert!(heating <= cooling);
            }
        }
    }
}

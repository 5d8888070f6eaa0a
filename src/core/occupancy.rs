use crate::core::markov::{OccupantState, TransitionModel};
use crate::core::units::{NATIVE_STEPS_PER_DAY, NATIVE_STEPS_PER_HOUR};
use crate::simulation_time::{DayType, SimulationCalendar};
use rand::Rng;
use tracing::debug;

/// The hourly transition-table bin that a native step of the year falls in.
pub fn time_bin_for_native_step(native_step: usize) -> usize {
    (native_step % NATIVE_STEPS_PER_DAY) / NATIVE_STEPS_PER_HOUR
}

/// One occupant's position in the activity Markov chain.
#[derive(Debug)]
pub struct OccupantWalker<'a> {
    model: &'a TransitionModel,
    occupant_count: usize,
    pub current_state: OccupantState,
}

impl<'a> OccupantWalker<'a> {
    pub fn new(
        model: &'a TransitionModel,
        occupant_count: usize,
        initial_state: OccupantState,
    ) -> Self {
        Self {
            model,
            occupant_count,
            current_state: initial_state,
        }
    }

    /// Draws the state this occupant moves into, without moving.
    pub fn transition(
        &self,
        day_type: DayType,
        time_bin: usize,
        rng: &mut impl Rng,
    ) -> OccupantState {
        self.model.sample_next_state(
            self.current_state,
            day_type,
            time_bin,
            self.occupant_count,
            rng,
        )
    }

    pub fn advance(
        &mut self,
        day_type: DayType,
        time_bin: usize,
        rng: &mut impl Rng,
    ) -> OccupantState {
        self.current_state = self.transition(day_type, time_bin, rng);
        self.current_state
    }

    /// Moves to the given state without a draw (used while the home is vacant).
    pub fn force(&mut self, state: OccupantState) {
        self.current_state = state;
    }
}

/// Every occupant's activity state at every native (15 minute) step of the simulated year.
#[derive(Clone, Debug)]
pub struct OccupancySeries {
    states: Vec<Vec<OccupantState>>,
    vacant_days: Vec<bool>,
}

impl OccupancySeries {
    pub fn new(states: Vec<Vec<OccupantState>>, vacant_days: Vec<bool>) -> Self {
        Self {
            states,
            vacant_days,
        }
    }

    pub fn occupant_count(&self) -> usize {
        self.states.len()
    }

    pub fn days(&self) -> usize {
        self.vacant_days.len()
    }

    pub fn native_steps(&self) -> usize {
        self.days() * NATIVE_STEPS_PER_DAY
    }

    pub fn is_vacant_day(&self, day: usize) -> bool {
        self.vacant_days[day]
    }

    pub fn non_vacant_days(&self) -> usize {
        self.vacant_days.iter().filter(|vacant| !**vacant).count()
    }

    pub fn occupant_states(&self, occupant: usize) -> &[OccupantState] {
        &self.states[occupant]
    }

    pub fn state(&self, occupant: usize, native_step: usize) -> OccupantState {
        self.states[occupant][native_step]
    }

    pub fn count_in_state(&self, native_step: usize, state: OccupantState) -> usize {
        self.states
            .iter()
            .filter(|occupant| occupant[native_step] == state)
            .count()
    }

    /// Fraction of the household in the given state; zero for an empty household.
    pub fn state_fraction(&self, native_step: usize, state: OccupantState) -> f64 {
        match self.occupant_count() {
            0 => 0.,
            n => self.count_in_state(native_step, state) as f64 / n as f64,
        }
    }

    pub fn home_count(&self, native_step: usize) -> usize {
        self.occupant_count() - self.count_in_state(native_step, OccupantState::Away)
    }

    pub fn active_occupants(&self, native_step: usize) -> impl Iterator<Item = usize> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(move |(_, occupant)| occupant[native_step] == OccupantState::Active)
            .map(|(idx, _)| idx)
    }

    /// Night in the occupancy-driven sense: somebody is home and everyone at home is asleep.
    pub fn is_night(&self, native_step: usize) -> bool {
        self.home_count(native_step) > 0 && self.count_in_state(native_step, OccupantState::Active) == 0
    }

    /// Nobody is home. An empty household is always unoccupied.
    pub fn is_unoccupied(&self, native_step: usize) -> bool {
        self.home_count(native_step) == 0
    }
}

/// Walks every occupant of a household through the simulated year.
#[derive(Debug)]
pub struct ActivitySimulator<'a> {
    model: &'a TransitionModel,
    calendar: &'a SimulationCalendar,
    vacant_days: Vec<bool>,
}

impl<'a> ActivitySimulator<'a> {
    pub fn new(
        model: &'a TransitionModel,
        calendar: &'a SimulationCalendar,
        vacant_days: Vec<bool>,
    ) -> Self {
        Self {
            model,
            calendar,
            vacant_days,
        }
    }

    pub fn simulate(&self, occupant_count: usize, rng: &mut impl Rng) -> OccupancySeries {
        let native_steps = self.calendar.days_in_year() * NATIVE_STEPS_PER_DAY;
        debug!(
            occupant_count,
            native_steps, "Simulating occupant activity states"
        );

        let states = (0..occupant_count)
            .map(|_| self.simulate_occupant(occupant_count, native_steps, rng))
            .collect();

        OccupancySeries::new(states, self.vacant_days.clone())
    }

    fn simulate_occupant(
        &self,
        occupant_count: usize,
        native_steps: usize,
        rng: &mut impl Rng,
    ) -> Vec<OccupantState> {
        let first_day_type = self.calendar.day_type(0);
        let initial_state = if self.vacant_days[0] {
            OccupantState::Away
        } else {
            self.model
                .sample_initial_state(occupant_count, first_day_type, 0, rng)
        };
        let mut walker = OccupantWalker::new(self.model, occupant_count, initial_state);

        let mut states = Vec::with_capacity(native_steps);
        states.push(walker.current_state);
        for step in 1..native_steps {
            // the target step decides both the day type and the hourly bin
            let day = step / NATIVE_STEPS_PER_DAY;
            if self.vacant_days[day] {
                walker.force(OccupantState::Away);
            } else {
                walker.advance(self.calendar.day_type(day), time_bin_for_native_step(step), rng);
            }
            states.push(walker.current_state);
        }

        states
    }
}
